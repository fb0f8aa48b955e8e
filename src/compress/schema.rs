//! Schema Compressor.
//!
//! Renders a JSON Schema as compact TypeScript-style type notation:
//!
//! ```text
//! {"type":"object","properties":{"path":{"type":"string"},"limit":{"type":"integer"}},
//!  "required":["path"]}
//!   → {path: string; limit?: number}
//! ```
//!
//! Total: anything unrecognised renders as `unknown`. `$ref`s into the
//! schema's own `$defs`/`definitions` are inlined; a reference that is
//! already being expanded renders as `unknown` instead of recursing.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

/// Nesting beyond this renders as `unknown`.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCompressor {
    include_descriptions: bool,
    max_description_len: usize,
}

impl Default for SchemaCompressor {
    fn default() -> Self {
        Self {
            include_descriptions: true,
            max_description_len: 50,
        }
    }
}

impl SchemaCompressor {
    pub fn new(include_descriptions: bool, max_description_len: usize) -> Self {
        Self {
            include_descriptions,
            max_description_len,
        }
    }

    /// Compress `schema` to type notation. Never fails.
    pub fn compress(&self, schema: &Value) -> String {
        let Some(root) = schema.as_object() else {
            return "unknown".to_string();
        };
        if root.is_empty() {
            return "unknown".to_string();
        }

        let definitions = root
            .get("$defs")
            .or_else(|| root.get("definitions"))
            .and_then(Value::as_object);

        let mut render = Renderer {
            options: *self,
            definitions,
            in_progress: HashSet::new(),
            resolved: HashMap::new(),
        };
        render.schema(schema, 0)
    }
}

/// Compress with default options (descriptions on, 50 chars).
pub fn compress_schema(schema: &Value) -> String {
    SchemaCompressor::default().compress(schema)
}

// ─── Renderer ────────────────────────────────────────────────────────────────

struct Renderer<'a> {
    options: SchemaCompressor,
    definitions: Option<&'a Map<String, Value>>,
    /// References currently being expanded.
    in_progress: HashSet<String>,
    /// Finished expansions, keyed by reference string.
    resolved: HashMap<String, String>,
}

impl<'a> Renderer<'a> {
    fn schema(&mut self, schema: &'a Value, depth: usize) -> String {
        let Some(obj) = schema.as_object() else {
            return "unknown".to_string();
        };
        if depth > MAX_DEPTH {
            return "unknown".to_string();
        }

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return self.reference(reference, depth);
        }
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            return values.iter().map(literal).collect::<Vec<_>>().join(" | ");
        }
        if let Some(value) = obj.get("const") {
            return literal(value);
        }
        if let Some(branches) = obj.get("anyOf").and_then(Value::as_array) {
            return self.union(branches, depth);
        }
        if let Some(branches) = obj.get("oneOf").and_then(Value::as_array) {
            return self.union(branches, depth);
        }
        if let Some(branches) = obj.get("allOf").and_then(Value::as_array) {
            // Approximation: the first branch stands in for the intersection.
            return match branches.first() {
                Some(first) => self.schema(first, depth + 1),
                None => "unknown".to_string(),
            };
        }

        match obj.get("type") {
            Some(Value::Array(types)) => types
                .iter()
                .map(|t| match t.as_str() {
                    Some(name) => self.named_type(name, obj, depth),
                    None => "unknown".to_string(),
                })
                .collect::<Vec<_>>()
                .join(" | "),
            Some(Value::String(name)) => self.named_type(name, obj, depth),
            _ if obj.contains_key("properties") => self.object(obj, depth),
            _ if obj.contains_key("items") => self.array(obj, depth),
            _ => "unknown".to_string(),
        }
    }

    fn named_type(&mut self, name: &str, obj: &'a Map<String, Value>, depth: usize) -> String {
        match name {
            "string" => "string".to_string(),
            "number" | "integer" => "number".to_string(),
            "boolean" => "boolean".to_string(),
            "null" => "null".to_string(),
            "array" => self.array(obj, depth),
            "object" => self.object(obj, depth),
            _ => "unknown".to_string(),
        }
    }

    fn array(&mut self, obj: &'a Map<String, Value>, depth: usize) -> String {
        match obj.get("items") {
            Some(items) if !is_empty_schema(items) => {
                let item = self.schema(items, depth + 1);
                if item.contains(" | ") {
                    format!("({item})[]")
                } else {
                    format!("{item}[]")
                }
            }
            _ => "unknown[]".to_string(),
        }
    }

    fn object(&mut self, obj: &'a Map<String, Value>, depth: usize) -> String {
        let properties = obj
            .get("properties")
            .and_then(Value::as_object)
            .filter(|p| !p.is_empty());

        let Some(properties) = properties else {
            return match obj.get("additionalProperties") {
                Some(Value::Bool(true)) => "Record<string, unknown>".to_string(),
                Some(value @ Value::Object(_)) => {
                    format!("Record<string, {}>", self.schema(value, depth + 1))
                }
                _ => "{}".to_string(),
            };
        };

        let required: HashSet<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields: Vec<String> = properties
            .iter()
            .map(|(name, prop)| {
                let marker = if required.contains(name.as_str()) { "" } else { "?" };
                let mut field = format!("{name}{marker}: {}", self.schema(prop, depth + 1));
                if let Some(comment) = self.description(prop) {
                    field.push_str(&format!(" /* {comment} */"));
                }
                field
            })
            .collect();

        format!("{{{}}}", fields.join("; "))
    }

    fn union(&mut self, branches: &'a [Value], depth: usize) -> String {
        let mut types: Vec<String> = Vec::new();
        for branch in branches {
            let rendered = self.schema(branch, depth + 1);
            if !types.contains(&rendered) {
                types.push(rendered);
            }
        }
        if types.is_empty() {
            return "unknown".to_string();
        }
        types.join(" | ")
    }

    fn reference(&mut self, reference: &str, depth: usize) -> String {
        if let Some(done) = self.resolved.get(reference) {
            return done.clone();
        }

        let target = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"))
            .and_then(|name| self.definitions?.get(name));

        let Some(target) = target else {
            return reference
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string();
        };

        if !self.in_progress.insert(reference.to_string()) {
            return "unknown".to_string();
        }
        let rendered = self.schema(target, depth + 1);
        self.in_progress.remove(reference);
        self.resolved.insert(reference.to_string(), rendered.clone());
        rendered
    }

    fn description(&self, prop: &Value) -> Option<String> {
        if !self.options.include_descriptions {
            return None;
        }
        let desc = prop.get("description")?.as_str()?;
        if desc.is_empty() {
            return None;
        }
        let max = self.options.max_description_len;
        if desc.chars().count() > max {
            let head: String = desc.chars().take(max.saturating_sub(3)).collect();
            Some(format!("{head}..."))
        } else {
            Some(desc.to_string())
        }
    }
}

fn is_empty_schema(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Null | Value::Bool(false) => true,
        _ => false,
    }
}

/// Render a JSON value as a type-level literal.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        _ => "unknown".to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn plain() -> SchemaCompressor {
        SchemaCompressor::new(false, 50)
    }

    #[test]
    fn test_empty_schema_is_unknown() {
        assert_eq!(compress_schema(&json!({})), "unknown");
        assert_eq!(compress_schema(&json!(null)), "unknown");
        assert_eq!(compress_schema(&json!("string")), "unknown");
    }

    #[test]
    fn test_required_field_has_no_marker() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });
        assert_eq!(compress_schema(&schema), "{path: string}");
    }

    #[test]
    fn test_optional_marker_and_declaration_order() {
        let schema = json!({
            "type": "object",
            "properties": {
                "zeta": {"type": "integer"},
                "alpha": {"type": "boolean"},
                "mid": {"type": "null"}
            },
            "required": ["alpha"]
        });
        assert_eq!(
            compress_schema(&schema),
            "{zeta?: number; alpha: boolean; mid?: null}"
        );
    }

    #[test]
    fn test_primitive_properties_each_marked_correctly() {
        let types = ["string", "number", "integer", "boolean", "null"];
        for (i, ty) in types.iter().enumerate() {
            let required: Vec<&str> = if i % 2 == 0 { vec!["a"] } else { vec!["b"] };
            let schema = json!({
                "type": "object",
                "properties": {"a": {"type": ty}, "b": {"type": ty}},
                "required": required
            });
            let out = compress_schema(&schema);
            if i % 2 == 0 {
                assert!(out.contains("a: ") && out.contains("b?: "), "{out}");
            } else {
                assert!(out.contains("a?: ") && out.contains("b: "), "{out}");
            }
        }
    }

    #[test]
    fn test_arrays() {
        assert_eq!(
            compress_schema(&json!({"type": "array", "items": {"type": "string"}})),
            "string[]"
        );
        assert_eq!(compress_schema(&json!({"type": "array"})), "unknown[]");
        assert_eq!(
            compress_schema(&json!({"type": "array", "items": {"type": ["string", "number"]}})),
            "(string | number)[]"
        );
        assert_eq!(
            compress_schema(&json!({"items": {"type": "boolean"}})),
            "boolean[]"
        );
    }

    #[test]
    fn test_enum_and_const_literals() {
        assert_eq!(
            compress_schema(&json!({"type": "string", "enum": ["asc", "desc"]})),
            "\"asc\" | \"desc\""
        );
        assert_eq!(compress_schema(&json!({"enum": [1, null, true]})), "1 | null | true");
        assert_eq!(compress_schema(&json!({"const": "say \"hi\""})), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_unions_deduplicate() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "integer"}, {"type": "number"}]});
        assert_eq!(compress_schema(&schema), "string | number");

        let schema = json!({"oneOf": [{"type": "null"}, {"type": "object", "properties": {"x": {"type": "string"}}}]});
        assert_eq!(compress_schema(&schema), "null | {x?: string}");

        assert_eq!(compress_schema(&json!({"type": ["string", "null"]})), "string | null");
    }

    #[test]
    fn test_all_of_uses_first_branch() {
        let schema = json!({"allOf": [
            {"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
            {"type": "object", "properties": {"b": {"type": "number"}}}
        ]});
        assert_eq!(compress_schema(&schema), "{a: string}");
        assert_eq!(compress_schema(&json!({"allOf": []})), "unknown");
    }

    #[test]
    fn test_records() {
        assert_eq!(
            compress_schema(&json!({"type": "object", "additionalProperties": true})),
            "Record<string, unknown>"
        );
        assert_eq!(
            compress_schema(&json!({"type": "object", "additionalProperties": {"type": "integer"}})),
            "Record<string, number>"
        );
        assert_eq!(compress_schema(&json!({"type": "object"})), "{}");
    }

    #[test]
    fn test_ref_resolution() {
        let schema = json!({
            "type": "object",
            "properties": {
                "from": {"$ref": "#/$defs/Point"},
                "to": {"$ref": "#/$defs/Point"}
            },
            "required": ["from", "to"],
            "$defs": {
                "Point": {"type": "object", "properties": {"x": {"type": "number"}, "y": {"type": "number"}}, "required": ["x", "y"]}
            }
        });
        assert_eq!(
            compress_schema(&schema),
            "{from: {x: number; y: number}; to: {x: number; y: number}}"
        );
    }

    #[test]
    fn test_legacy_definitions_key() {
        let schema = json!({
            "type": "object",
            "properties": {"mode": {"$ref": "#/definitions/Mode"}},
            "definitions": {"Mode": {"enum": ["r", "w"]}}
        });
        assert_eq!(compress_schema(&schema), "{mode?: \"r\" | \"w\"}");
    }

    #[test]
    fn test_unresolved_ref_uses_last_segment() {
        let schema = json!({"type": "object", "properties": {"n": {"$ref": "#/$defs/Missing"}}});
        assert_eq!(compress_schema(&schema), "{n?: Missing}");
        let schema = json!({"type": "object", "properties": {"n": {"$ref": "https://example.com/node.json"}}});
        assert_eq!(compress_schema(&schema), "{n?: node.json}");
    }

    #[test]
    fn test_self_referential_ref_terminates() {
        let schema = json!({
            "type": "object",
            "properties": {"root": {"$ref": "#/$defs/Node"}},
            "required": ["root"],
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}
                    },
                    "required": ["value"]
                }
            }
        });
        assert_eq!(
            compress_schema(&schema),
            "{root: {value: string; children?: unknown[]}}"
        );
    }

    #[test]
    fn test_descriptions_truncated() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path"},
                "query": {"type": "string", "description": "A very long description that keeps going well past the limit"}
            },
            "required": ["path"]
        });
        let out = SchemaCompressor::new(true, 20).compress(&schema);
        assert_eq!(
            out,
            "{path: string /* File path */; query?: string /* A very long descr... */}"
        );
    }

    #[test]
    fn test_descriptions_disabled_suppresses_comments() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "File path"}},
            "required": ["path"]
        });
        let out = plain().compress(&schema);
        assert_eq!(out, "{path: string}");
        assert!(!out.contains("/*"));
    }

    #[test]
    fn test_nested_schema_size_reduction() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "filters": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "enum": ["open", "closed"]},
                        "labels": {"type": "array", "items": {"type": "string"}},
                        "assignee": {"type": ["string", "null"]},
                        "created_after": {"type": "string"}
                    }
                },
                "sort": {
                    "type": "object",
                    "properties": {
                        "field": {"type": "string"},
                        "direction": {"type": "string", "enum": ["asc", "desc"]}
                    },
                    "required": ["field"]
                },
                "limit": {"type": "integer"},
                "include_archived": {"type": "boolean"}
            },
            "required": ["query"]
        });
        let verbose = serde_json::to_string_pretty(&schema).unwrap();
        let compact = plain().compress(&schema);
        let reduction = 1.0 - compact.len() as f64 / verbose.len() as f64;
        assert!(reduction >= 0.6, "reduction {reduction:.2}: {compact}");
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let mut schema = json!({"type": "string"});
        for _ in 0..200 {
            schema = json!({"type": "array", "items": schema});
        }
        let out = compress_schema(&schema);
        assert!(out.starts_with("unknown"));
        assert!(out.ends_with("[]"));
    }
}
