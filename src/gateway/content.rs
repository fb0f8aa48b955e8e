//! Turning raw backend results into what callers receive.

use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{is_content_block, is_multimodal_block};
use crate::compress::ResponseCompressor;

/// Payload pulled out of a `tools/call` result.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// Structured or textual data, eligible for compression.
    Data(Value),
    /// Content blocks passed through untouched.
    Multimodal(Vec<Value>),
}

/// Result of `describe` or `call`, in both compact and raw form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallOutcome {
    Structured {
        compact: String,
        raw: Value,
        compressed: bool,
    },
    Multimodal { items: Vec<Value> },
}

impl CallOutcome {
    /// Run extracted data through the compressor; multimodal passes through.
    pub fn from_extracted(extracted: Extracted, compressor: &ResponseCompressor) -> Self {
        match extracted {
            Extracted::Multimodal(items) => Self::Multimodal { items },
            Extracted::Data(raw) => Self::structured(raw, compressor),
        }
    }

    pub fn structured(raw: Value, compressor: &ResponseCompressor) -> Self {
        let (compact, compressed) = compressor.compress(&raw);
        Self::Structured {
            compact,
            raw,
            compressed,
        }
    }

    /// `"toon"`, `"json"`, or `"content"` for passthrough.
    pub fn format(&self) -> &'static str {
        match self {
            Self::Structured { compressed: true, .. } => "toon",
            Self::Structured { .. } => "json",
            Self::Multimodal { .. } => "content",
        }
    }

    /// Dual-format object: `{data, raw_data, compressed, format}`, or the
    /// content items themselves for multimodal results.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured {
                compact,
                raw,
                compressed,
            } => json!({
                "data": compact,
                "raw_data": raw,
                "compressed": compressed,
                "format": self.format(),
            }),
            Self::Multimodal { items } => Value::Array(items.clone()),
        }
    }
}

/// Extract the payload of a `tools/call` result.
///
/// - no content: `structuredContent`, else `null`
/// - one text block: its text, decoded as JSON where possible
/// - one non-text block, or several with any non-text: passthrough
/// - several text blocks: list of their texts
pub fn extract_call_result(result: &Value) -> Extracted {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    match content {
        [] => Extracted::Data(result.get("structuredContent").cloned().unwrap_or(Value::Null)),
        [single] => match single.get("text").and_then(Value::as_str) {
            Some(text) if is_content_block(single) => Extracted::Data(unwrap_json_text(text)),
            _ if is_multimodal_block(single) => Extracted::Multimodal(vec![single.clone()]),
            _ => Extracted::Data(single.clone()),
        },
        items if items.iter().any(is_multimodal_block) => Extracted::Multimodal(items.to_vec()),
        items => Extracted::Data(Value::Array(
            items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) => Value::String(text.to_string()),
                    None => item.clone(),
                })
                .collect(),
        )),
    }
}

/// Decode JSON text, unwrapping one level of double encoding
/// (`"\"[1,2]\""` → `[1,2]`). Non-JSON text comes back as a string.
pub fn unwrap_json_text(text: &str) -> Value {
    if text.is_empty() {
        return Value::String(String::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => {
            serde_json::from_str::<Value>(&inner).unwrap_or(Value::String(inner))
        }
        Ok(parsed) => parsed,
        Err(_) => Value::String(text.to_string()),
    }
}

/// Flatten a `resources/read` result: text parts become strings, binary
/// parts become `{uri, mimeType, blob}`. One part is returned bare, several
/// as a list. `None` when the result has no contents.
pub fn extract_read_result(result: &Value) -> Option<Value> {
    let contents = result.get("contents").and_then(Value::as_array)?;
    let mut parts: Vec<Value> = contents
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                return Value::String(text.to_string());
            }
            json!({
                "uri": part.get("uri").cloned().unwrap_or(Value::Null),
                "mimeType": part.get("mimeType").cloned().unwrap_or(Value::Null),
                "blob": part.get("blob").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Value::Array(parts)),
    }
}
