//! One-line-per-entry overviews of everything in the cache.
//!
//! Embedded in the front-end operation descriptions and logged at startup.

use super::capability::CapabilityCache;

const TOOL_DESCRIPTION_MAX: usize = 60;
const RESOURCE_DESCRIPTION_MAX: usize = 80;
const INSTRUCTIONS_MAX: usize = 300;

/// Truncate to `max` chars, replacing the tail with `...` when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// `server.tool(param, optional?): description` for every visible operation.
pub fn tools_overview(cache: &CapabilityCache, is_hidden: impl Fn(&str, &str) -> bool) -> String {
    let mut lines = vec!["Available tools:".to_string()];

    for backend in cache.backends() {
        for op in cache.list_operations(&backend) {
            if is_hidden(&backend, &op.name) {
                continue;
            }
            let required = op.required_parameters();
            let mut params = op.parameter_names();
            params.sort_unstable();
            let params: Vec<String> = params
                .into_iter()
                .map(|p| {
                    if required.contains(&p) {
                        p.to_string()
                    } else {
                        format!("{p}?")
                    }
                })
                .collect();

            let desc = truncate_chars(&op.description, TOOL_DESCRIPTION_MAX);
            let full_name = op.qualified_name();
            if params.is_empty() {
                lines.push(format!("  - {full_name}: {desc}"));
            } else {
                lines.push(format!("  - {full_name}({}): {desc}", params.join(", ")));
            }
        }
    }

    if lines.len() == 1 {
        return "No tools available.".to_string();
    }
    lines.join("\n")
}

/// Resources grouped by backend, with the backend's instructions.
pub fn resources_overview(cache: &CapabilityCache) -> String {
    let mut lines = vec!["Available resources:".to_string()];

    for backend in cache.backends() {
        let Some(snapshot) = cache.snapshot(&backend) else {
            continue;
        };
        if snapshot.resources.is_empty() {
            continue;
        }

        match snapshot.info.instructions.as_deref() {
            Some(instructions) if !instructions.is_empty() => lines.push(format!(
                "  Server: {backend} - {}",
                truncate_chars(instructions, INSTRUCTIONS_MAX)
            )),
            _ => lines.push(format!("  Server: {backend}")),
        }

        for resource in &snapshot.resources {
            let mime = resource
                .mime_type
                .as_deref()
                .map(|m| format!(" [{m}]"))
                .unwrap_or_default();
            let size = resource
                .size
                .map(|s| format!(" ({s} bytes)"))
                .unwrap_or_default();
            let desc = resource
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!(": {}", truncate_chars(d, RESOURCE_DESCRIPTION_MAX)))
                .unwrap_or_default();
            lines.push(format!(
                "    - {} ({}){mime}{size}{desc}",
                resource.name, resource.uri
            ));
        }
    }

    if lines.len() == 1 {
        return "No resources available.".to_string();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::cache::types::{BackendInfo, BackendSnapshot, OperationInfo, ResourceInfo};

    fn cache() -> CapabilityCache {
        let cache = CapabilityCache::new();
        cache.store(BackendSnapshot {
            info: BackendInfo {
                name: "fs".into(),
                server_name: "filesystem".into(),
                version: "1.0".into(),
                instructions: Some("Read and write files.".into()),
            },
            operations: vec![
                OperationInfo {
                    backend: "fs".into(),
                    name: "read_file".into(),
                    description: "Read the complete contents of a file from the file system as text".into(),
                    input_schema: json!({
                        "type": "object",
                        "properties": {"path": {"type": "string"}, "encoding": {"type": "string"}},
                        "required": ["path"]
                    }),
                },
                OperationInfo {
                    backend: "fs".into(),
                    name: "list_roots".into(),
                    description: "List roots".into(),
                    input_schema: json!({}),
                },
            ],
            resources: vec![ResourceInfo {
                backend: "fs".into(),
                uri: "file:///notes.txt".into(),
                name: "notes.txt".into(),
                description: Some("Scratch notes".into()),
                mime_type: Some("text/plain".into()),
                size: Some(42),
            }],
            loaded_at: Utc::now(),
        });
        cache
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 8), "hello...");
    }

    #[test]
    fn test_tools_overview_format() {
        let text = tools_overview(&cache(), |_, _| false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Available tools:");
        assert_eq!(
            lines[1],
            "  - fs.read_file(encoding?, path): Read the complete contents of a file from the file system..."
        );
        assert_eq!(lines[2], "  - fs.list_roots: List roots");
    }

    #[test]
    fn test_tools_overview_hides_disabled() {
        let text = tools_overview(&cache(), |_, op| op == "read_file");
        assert!(!text.contains("read_file"));
        assert!(text.contains("list_roots"));

        let none = tools_overview(&cache(), |_, _| true);
        assert_eq!(none, "No tools available.");
    }

    #[test]
    fn test_resources_overview_format() {
        let text = resources_overview(&cache());
        assert!(text.contains("  Server: fs - Read and write files."));
        assert!(text.contains("    - notes.txt (file:///notes.txt) [text/plain] (42 bytes): Scratch notes"));
        assert_eq!(resources_overview(&CapabilityCache::new()), "No resources available.");
    }
}
