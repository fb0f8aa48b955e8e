//! Response Compressor.
//!
//! Structured results at or above a size threshold are re-encoded as TOON;
//! everything else passes through as plain text. Multimodal content is
//! never touched.

use serde_json::Value;

use super::toon::encode_toon;
use crate::backend::is_multimodal_block;

/// Shape classification for compression decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Strings, numbers, booleans, null.
    Primitive,
    /// Empty list, or a list of objects sharing one key set.
    Array,
    /// Any other list.
    Mixed,
    Object,
}

pub fn detect_data_type(value: &Value) -> DataType {
    match value {
        Value::Object(_) => DataType::Object,
        Value::Array(items) if items.is_empty() => DataType::Array,
        Value::Array(items) => {
            let Some(first) = items[0].as_object() else {
                return DataType::Mixed;
            };
            let uniform = items.iter().all(|item| {
                item.as_object().is_some_and(|obj| {
                    obj.len() == first.len() && first.keys().all(|k| obj.contains_key(k))
                })
            });
            if uniform {
                DataType::Array
            } else {
                DataType::Mixed
            }
        }
        _ => DataType::Primitive,
    }
}

fn is_multimodal(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(is_multimodal_block),
        other => is_multimodal_block(other),
    }
}

/// Whether `value` qualifies for TOON encoding at `min_size`.
///
/// Size is element count for lists and key count for objects. Mixed lists
/// must reach twice the threshold.
pub fn is_compressible(value: &Value, min_size: usize) -> bool {
    if is_multimodal(value) {
        return false;
    }
    match (detect_data_type(value), value) {
        (DataType::Primitive, _) => false,
        (DataType::Array, Value::Array(items)) => items.len() >= min_size,
        (DataType::Mixed, Value::Array(items)) => items.len() >= min_size.saturating_mul(2),
        (DataType::Object, Value::Object(map)) => map.len() >= min_size,
        _ => false,
    }
}

/// Plain textual form: strings verbatim, everything else as compact JSON.
pub fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCompressor {
    enabled: bool,
    min_size: usize,
}

impl Default for ResponseCompressor {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1,
        }
    }
}

impl ResponseCompressor {
    pub fn new(enabled: bool, min_size: usize) -> Self {
        Self { enabled, min_size }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the rendered text and whether TOON encoding was applied.
    pub fn compress(&self, value: &Value) -> (String, bool) {
        if self.enabled && is_compressible(value, self.min_size) {
            (encode_toon(value), true)
        } else {
            (plain_text(value), false)
        }
    }
}
