//! Config file discovery and loading.
//!
//! Accepts JSON (`.json`) or YAML (anything else). `${VAR}` and
//! `${VAR:-default}` references are interpolated before parsing, so secrets
//! such as API tokens can live in the environment instead of the file.

use std::path::{Path, PathBuf};

use super::errors::ConfigError;
use super::types::GatewayConfig;

/// Env var that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SWITCHBOARD_CONFIG";

/// File names probed in the working directory and the data directory.
const CANDIDATE_NAMES: &[&str] = &["config.json", "config.yaml", "config.yml"];

// ─── Discovery ───────────────────────────────────────────────────────────────

/// Resolve which config file to load.
///
/// Order: the explicit path (must exist), `SWITCHBOARD_CONFIG`, the working
/// directory `cwd`, then the gateway data directory.
pub fn find_config_path(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotFound {
            path: path.display().to_string(),
        });
    }

    if let Ok(from_env) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&from_env));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let data_dir = crate::data_dir();
    for dir in [cwd, data_dir.as_path()] {
        for name in CANDIDATE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    Err(ConfigError::NotFound {
        path: format!("{}/config.json", cwd.display()),
    })
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Read, interpolate, parse, and validate a config file.
pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config = parse_gateway_config(&raw, is_json)?;

    tracing::info!(
        path = %path.display(),
        backends = config.backends.len(),
        mode = ?config.connection_mode,
        "loaded gateway config"
    );
    Ok(config)
}

/// Parse config text. Exposed separately so hot reload can accept raw text.
pub fn parse_gateway_config(raw: &str, is_json: bool) -> Result<GatewayConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let config: GatewayConfig = if is_json {
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?
    };

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub(crate) fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ConnectionMode, TransportKind};

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__SWB_TEST_MISSING__");
        let result = interpolate_env_vars("${__SWB_TEST_MISSING__:-fallback}");
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__SWB_TEST_TOKEN__", "s3cret");
        let result = interpolate_env_vars("Bearer ${__SWB_TEST_TOKEN__}");
        assert_eq!(result, "Bearer s3cret");
        std::env::remove_var("__SWB_TEST_TOKEN__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = r#"{"a": "$ not a var"}"#;
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/gateway");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/gateway"));
    }

    #[test]
    fn test_parse_json_config() {
        let raw = r#"{
            "mcpServers": {
                "fs": {"command": "npx", "args": ["-y", "server-fs", "/tmp"]},
                "web": {"type": "http", "url": "https://example.com/mcp",
                        "headers": {"Authorization": "Bearer x"}}
            },
            "connection_mode": "pool",
            "pool_max_size": 3
        }"#;
        let cfg = parse_gateway_config(raw, true).unwrap();
        assert_eq!(cfg.backends.len(), 2);
        assert_eq!(cfg.backends["web"].transport, TransportKind::Http);
        assert_eq!(cfg.connection_mode, ConnectionMode::Pool);
        assert_eq!(cfg.pool_max_size, 3);
    }

    #[test]
    fn test_parse_yaml_config() {
        let raw = "mcpServers:\n  fs:\n    command: cat\nhealth_check_enabled: false\n";
        let cfg = parse_gateway_config(raw, false).unwrap();
        assert_eq!(cfg.backends["fs"].command.as_deref(), Some("cat"));
        assert!(!cfg.health_check_enabled);
    }

    #[test]
    fn test_parse_rejects_invalid_backend() {
        let raw = r#"{"mcpServers": {"web": {"type": "http"}}}"#;
        let err = parse_gateway_config(raw, true).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse_gateway_config("{not json", true).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mcpServers": {"echo": {"command": "cat"}}}"#).unwrap();

        let cfg = load_gateway_config(&path).unwrap();
        assert!(cfg.backends.contains_key("echo"));
    }

    #[test]
    fn test_find_config_path_prefers_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "mcpServers: {}\n").unwrap();

        let found = find_config_path(Some(&path), dir.path()).unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn test_find_config_path_missing_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = find_config_path(Some(&missing), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_find_config_path_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        // An explicit env override would win; this test only runs the cwd probe
        // when the variable is unset.
        if std::env::var(CONFIG_ENV_VAR).is_err() {
            let found = find_config_path(None, dir.path()).unwrap();
            assert_eq!(found, path);
        }
    }
}
