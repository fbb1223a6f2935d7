use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::types::{ApiKeyHash, PermissionTag};

/// Default capacity of the per-invocation envelope channel.
pub const DEFAULT_STREAM_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Tools disabled right after the built-in tools are registered.
    #[serde(default)]
    pub disabled_tools: Vec<String>,
    /// API keys accepted via the `X-API-Key` header.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    /// Whether callers without a key are served.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    /// Permission level granted to anonymous callers.
    #[serde(default)]
    pub anonymous_permission: PermissionTag,
    /// Capacity of each streaming invocation's bounded channel.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Whether the permission-level authorizer is installed.
    #[serde(default = "default_true")]
    pub authorization: bool,
    /// Whether parameters are checked against each tool's schema.
    #[serde(default = "default_true")]
    pub validate_parameters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyConfig {
    /// Caller id reported for requests using this key.
    pub name: String,
    /// Hex SHA-256 of the key; the key itself is never stored.
    pub key_sha256: ApiKeyHash,
    #[serde(default)]
    pub permission: PermissionTag,
}

fn default_true() -> bool {
    true
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            disabled_tools: Vec::new(),
            api_keys: Vec::new(),
            allow_anonymous: true,
            anonymous_permission: PermissionTag::Public,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            authorization: true,
            validate_parameters: true,
        }
    }
}

impl ServerConfig {
    /// Parse a config document, expanding `${VAR}` references first.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let mut cfg: ServerConfig = serde_json::from_value(expand_value(value))?;

        if cfg.stream_buffer == 0 {
            return Err(anyhow::anyhow!("`streamBuffer` must be greater than zero"));
        }
        for key in &mut cfg.api_keys {
            let normalized = key.key_sha256.as_str().trim().to_ascii_lowercase();
            if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(anyhow::anyhow!(
                    "API key `{}` must have a 64 character hex `keySha256`",
                    key.name
                ));
            }
            key.key_sha256 = ApiKeyHash::new(normalized);
        }

        Ok(cfg)
    }
}

/// Locate the config file, if any.
///
/// `TOOLHUB_CONFIG` wins and must exist; otherwise the XDG location and
/// `./toolhub.json` are probed. `None` means "run with defaults".
pub fn resolve_config_path() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(p) = env::var("TOOLHUB_CONFIG") {
        let path = PathBuf::from(p);
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "TOOLHUB_CONFIG points to missing file {}",
                path.display()
            ));
        }
        return Ok(Some(path));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("toolhub").join("toolhub.json");
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }

    let candidate = PathBuf::from("toolhub.json");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

/// Load the config from an explicit path, or from the resolved default
/// location, falling back to [`ServerConfig::default`].
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => resolve_config_path()?,
    };

    match path {
        Some(path) => {
            let raw = fs::read_to_string(&path).map_err(|e| {
                anyhow::anyhow!("Failed to read config {}: {}", path.display(), e)
            })?;
            tracing::info!(path = %path.display(), "Loaded toolhub config");
            ServerConfig::from_json_str(&raw)
        }
        None => {
            tracing::info!("No toolhub config found, using defaults");
            Ok(ServerConfig::default())
        }
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert!(cfg.allow_anonymous);
        assert_eq!(cfg.stream_buffer, DEFAULT_STREAM_BUFFER);
    }

    #[test]
    fn test_full_document() {
        let raw = format!(
            r#"{{
                "disabledTools": ["count_up"],
                "apiKeys": [{{ "name": "ops", "keySha256": "{}", "permission": "admin" }}],
                "allowAnonymous": false,
                "anonymousPermission": "protected",
                "streamBuffer": 4,
                "authorization": false,
                "validateParameters": false
            }}"#,
            HASH.to_uppercase()
        );
        let cfg = ServerConfig::from_json_str(&raw).unwrap();
        assert_eq!(cfg.disabled_tools, vec!["count_up".to_string()]);
        assert_eq!(cfg.api_keys[0].permission, PermissionTag::Admin);
        assert_eq!(cfg.api_keys[0].key_sha256.as_str(), HASH);
        assert!(!cfg.allow_anonymous);
        assert_eq!(cfg.anonymous_permission, PermissionTag::Protected);
        assert_eq!(cfg.stream_buffer, 4);
        assert!(!cfg.authorization);
        assert!(!cfg.validate_parameters);
    }

    #[test]
    fn test_rejects_zero_stream_buffer() {
        assert!(ServerConfig::from_json_str(r#"{ "streamBuffer": 0 }"#).is_err());
    }

    #[test]
    fn test_rejects_malformed_key_hash() {
        let raw = r#"{ "apiKeys": [{ "name": "x", "keySha256": "abc" }] }"#;
        assert!(ServerConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn test_expand_env_vars_keeps_unknown_references() {
        assert_eq!(
            expand_env_vars("a-${TOOLHUB_SURELY_UNSET_VAR_42}-b"),
            "a-${TOOLHUB_SURELY_UNSET_VAR_42}-b"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_expand_value_recurses() {
        let path = env::var("PATH").unwrap_or_default();
        let v = expand_value(serde_json::json!({ "list": ["${PATH}"], "n": 1 }));
        assert_eq!(v["list"][0], Value::String(path));
        assert_eq!(v["n"], 1);
    }

    #[test]
    fn test_load_config_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "disabledTools": ["echo"] }}"#).unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.disabled_tools, vec!["echo".to_string()]);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.json"))).is_err());
    }
}
