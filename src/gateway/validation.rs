//! Argument checks against a cached input schema.
//!
//! Only presence is checked: every `required` name must be supplied and
//! every supplied name must be a declared property. Value types are left to
//! the backend.

use serde_json::{Map, Value};

/// Returns a human-readable reason on the first violation.
pub fn validate_arguments(arguments: &Map<String, Value>, schema: &Value) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(field) {
                return Err(format!("Missing required argument: '{field}'"));
            }
        }
    }

    let declared: Vec<&str> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default();

    for key in arguments.keys() {
        if !declared.contains(&key.as_str()) {
            return Err(format!(
                "Unknown argument: '{key}'. Available: [{}]",
                declared.join(", ")
            ));
        }
    }
    Ok(())
}

/// Normalise caller-supplied arguments to an object. `null`/absent is empty.
pub fn arguments_object(arguments: Option<&Value>) -> Result<Map<String, Value>, String> {
    match arguments {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(format!(
            "arguments must be an object, got {}",
            match other {
                Value::Array(_) => "array",
                Value::String(_) => "string",
                Value::Number(_) => "number",
                Value::Bool(_) => "boolean",
                _ => "value",
            }
        )),
    }
}
