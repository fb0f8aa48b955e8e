//! TOON encoding: an indentation-based, token-lean rendering of JSON.
//!
//! - objects: `key: value`, nested objects indented two spaces
//! - primitive arrays: `key[3]: a,b,c`
//! - uniform arrays of flat objects: a `key[N]{f1,f2}:` header, then one
//!   comma-separated row per element
//! - anything else: `key[N]:` followed by `- item` lines
//!
//! Strings are quoted only when they would otherwise be ambiguous.

use serde_json::{Map, Value};

const INDENT: &str = "  ";

/// Encode `value` as TOON text.
pub fn encode_toon(value: &Value) -> String {
    let mut lines = Vec::new();
    match value {
        Value::Object(map) => encode_object(map, 0, &mut lines),
        Value::Array(items) => encode_array(None, items, 0, &mut lines),
        other => lines.push(encode_primitive(other)),
    }
    lines.join("\n")
}

fn encode_object(map: &Map<String, Value>, depth: usize, out: &mut Vec<String>) {
    for (key, value) in map {
        encode_field(&encode_key(key), value, depth, out);
    }
}

fn encode_field(key: &str, value: &Value, depth: usize, out: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    match value {
        Value::Object(map) => {
            out.push(format!("{pad}{key}:"));
            encode_object(map, depth + 1, out);
        }
        Value::Array(items) => encode_array(Some(key), items, depth, out),
        primitive => out.push(format!("{pad}{key}: {}", encode_primitive(primitive))),
    }
}

fn encode_array(key: Option<&str>, items: &[Value], depth: usize, out: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    let key = key.unwrap_or("");
    let len = items.len();

    if items.is_empty() {
        out.push(format!("{pad}{key}[0]:"));
        return;
    }

    if items.iter().all(is_primitive) {
        let joined: Vec<String> = items.iter().map(encode_primitive).collect();
        out.push(format!("{pad}{key}[{len}]: {}", joined.join(",")));
        return;
    }

    if let Some(fields) = tabular_fields(items) {
        let header: Vec<String> = fields.iter().map(|f| encode_key(f)).collect();
        out.push(format!("{pad}{key}[{len}]{{{}}}:", header.join(",")));
        let row_pad = INDENT.repeat(depth + 1);
        for item in items {
            let row: Vec<String> = fields
                .iter()
                .map(|f| encode_primitive(item.get(f.as_str()).unwrap_or(&Value::Null)))
                .collect();
            out.push(format!("{row_pad}{}", row.join(",")));
        }
        return;
    }

    out.push(format!("{pad}{key}[{len}]:"));
    for item in items {
        encode_list_item(item, depth + 1, out);
    }
}

fn encode_list_item(item: &Value, depth: usize, out: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    let mut nested = Vec::new();
    match item {
        Value::Object(map) if map.is_empty() => {
            out.push(format!("{pad}-"));
            return;
        }
        // The first line moves onto the hyphen; the rest keep their
        // indentation, which lines up with the text after "- ".
        Value::Object(map) => encode_object(map, depth + 1, &mut nested),
        Value::Array(inner) => encode_array(None, inner, depth + 1, &mut nested),
        primitive => {
            out.push(format!("{pad}- {}", encode_primitive(primitive)));
            return;
        }
    }
    if let Some(first) = nested.first_mut() {
        *first = format!("{pad}- {}", first.trim_start());
    }
    out.extend(nested);
}

/// Field names when every element is an object with the same keys and
/// only primitive values. Order follows the first element.
fn tabular_fields(items: &[Value]) -> Option<Vec<String>> {
    let first = items.first()?.as_object()?;
    if first.is_empty() {
        return None;
    }
    let fields: Vec<String> = first.keys().cloned().collect();

    let uniform = items.iter().all(|item| {
        item.as_object().is_some_and(|obj| {
            obj.len() == fields.len()
                && fields.iter().all(|f| obj.contains_key(f.as_str()))
                && obj.values().all(is_primitive)
        })
    });
    uniform.then_some(fields)
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn encode_primitive(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if needs_quotes(s) => quote(s),
        Value::String(s) => s.clone(),
        // Only reached for non-primitives, which callers route elsewhere.
        other => quote(&other.to_string()),
    }
}

fn encode_key(key: &str) -> String {
    let mut chars = key.chars();
    let bare = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if bare {
        key.to_string()
    } else {
        quote(key)
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s != s.trim()
        || matches!(s, "true" | "false" | "null")
        || s.parse::<f64>().is_ok()
        || s.starts_with('-')
        || s.chars().any(|c| {
            matches!(c, ',' | ':' | '"' | '\\' | '[' | ']' | '{' | '}') || c.is_control()
        })
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
