use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub content_host: ContentHostConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is; relative paths are joined with the
/// config file's parent directory so the working directory does not matter.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Defaults
// ============================================================================

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "chatrelay.yaml";
/// Default sessions directory (relative to config file).
pub const DEFAULT_SESSIONS_DIR: &str = "tokens";
/// Default form value sent as the content host's `path` field.
pub const DEFAULT_PATH_HINT: &str = "whatsapp";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    21465
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    512
}

fn default_sessions_path() -> PathBuf {
    PathBuf::from(DEFAULT_SESSIONS_DIR)
}

fn default_pairing_timeout() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    3000
}

fn default_bridge_command() -> String {
    "chatrelay-bridge".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_backend_timeout() -> u64 {
    120
}

fn default_path_hint() -> String {
    DEFAULT_PATH_HINT.to_string()
}

/// Serde default for bool fields that should be `true` (serde's default is `false`).
fn default_true() -> bool {
    true
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// Nested expansion (`${VAR:-${OTHER}}`) is not supported.
///
/// ```yaml
/// backend:
///   url: ${CHATBOT_URL}
/// server:
///   port: ${PORT:-21465}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse `VAR}` or `VAR:-default}` after a `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;

    loop {
        let Some(c) = chars.next() else {
            return Err(ConfigError::UnclosedVarReference);
        };
        match (c, default_value.as_mut()) {
            ('}', _) => break,
            (':', None) if chars.peek() == Some(&'-') => {
                chars.next();
                default_value = Some(String::new());
            }
            (c, Some(default)) => default.push(c),
            (c, None) => var_name.push(c),
        }
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Maximum number of requests handled concurrently by the control surface.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding one credential directory per session.
    #[serde(default = "default_sessions_path")]
    pub path: PathBuf,
    /// How long a session may wait for its pairing code to be scanned.
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_seconds: u64,
    /// Re-create every persisted session on startup.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            path: default_sessions_path(),
            pairing_timeout_seconds: default_pairing_timeout(),
            restore_on_start: true,
        }
    }
}

impl SessionsConfig {
    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_seconds)
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Quiet window before a conversation's buffered messages are flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Bridge subprocess spawned for every session.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// How long to wait for a bridge to acknowledge a send.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
            env: HashMap::new(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

// ============================================================================
// BackendConfig
// ============================================================================

/// Conversational backend that receives aggregated messages.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Endpoint receiving `{from, message, sessionName}`. Unset disables replies.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: default_backend_timeout(),
        }
    }
}

// ============================================================================
// ContentHostConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ContentHostConfig {
    /// Upload endpoint for inbound images. Unset drops image fragments.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_path_hint")]
    pub path_hint: String,
}

impl Default for ContentHostConfig {
    fn default() -> Self {
        Self {
            url: None,
            path_hint: default_path_hint(),
        }
    }
}

// ============================================================================
// NotificationsConfig
// ============================================================================

/// Webhooks called when a session connects or logs out.
///
/// Missing URLs fall back to log-only delivery.
#[derive(Debug, Default, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub connected_url: Option<String>,
    #[serde(default)]
    pub disconnected_url: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 21465);
        assert_eq!(config.sessions.path, PathBuf::from("tokens"));
        assert_eq!(config.sessions.pairing_timeout(), Duration::from_secs(60));
        assert!(config.sessions.restore_on_start);
        assert_eq!(config.pipeline.debounce(), Duration::from_millis(3000));
        assert_eq!(config.content_host.path_hint, "whatsapp");
        assert!(config.backend.url.is_none());
        assert!(config.notifications.connected_url.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let config = Config::load(tmp_dir.path().join("missing.yaml"))
            .await
            .unwrap();
        assert_eq!(config.server.port, 21465);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
sessions:
  path: /var/lib/chatrelay
  pairing_timeout_seconds: 90
  restore_on_start: false
pipeline:
  debounce_ms: 500
bridge:
  command: /usr/local/bin/wa-bridge
  args: ["--headless"]
  env:
    LOG_LEVEL: debug
backend:
  url: http://bot.local/chat
content_host:
  url: http://files.local/upload
notifications:
  connected_url: http://hooks.local/up
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sessions.path, PathBuf::from("/var/lib/chatrelay"));
        assert_eq!(config.sessions.pairing_timeout_seconds, 90);
        assert!(!config.sessions.restore_on_start);
        assert_eq!(config.pipeline.debounce_ms, 500);
        assert_eq!(config.bridge.command, "/usr/local/bin/wa-bridge");
        assert_eq!(config.bridge.args, vec!["--headless"]);
        assert_eq!(config.bridge.env.get("LOG_LEVEL").unwrap(), "debug");
        assert_eq!(config.bridge.command_timeout_seconds, 30);
        assert_eq!(config.backend.url.as_deref(), Some("http://bot.local/chat"));
        assert_eq!(config.content_host.path_hint, "whatsapp");
        assert!(config.notifications.disconnected_url.is_none());
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        assert!(Config::load(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_load_with_env_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("TEST_CHATBOT_URL", "http://bot.example/hook") };

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
backend:
  url: ${{TEST_CHATBOT_URL}}
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(
            config.backend.url.as_deref(),
            Some("http://bot.example/hook")
        );

        unsafe { std::env::remove_var("TEST_CHATBOT_URL") };
    }

    #[test]
    fn test_resolve_path_absolute() {
        let result = resolve_path(
            Path::new("/etc/chatrelay/chatrelay.yaml"),
            Path::new("/var/data/tokens"),
        );
        assert_eq!(result, PathBuf::from("/var/data/tokens"));
    }

    #[test]
    fn test_resolve_path_relative() {
        let result = resolve_path(Path::new("/etc/chatrelay/chatrelay.yaml"), Path::new("tokens"));
        assert_eq!(result, PathBuf::from("/etc/chatrelay/tokens"));
    }

    #[test]
    fn test_resolve_path_config_in_current_dir() {
        let result = resolve_path(Path::new("chatrelay.yaml"), Path::new("tokens"));
        assert_eq!(result, PathBuf::from("tokens"));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "plain string without variables";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("MISSING_VAR_54321") };
        match expand_env_vars("value: ${MISSING_VAR_54321}") {
            Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, "MISSING_VAR_54321"),
            other => panic!("expected MissingEnvVar error, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("UNSET_PORT_VAR") };
        let result = expand_env_vars("port: ${UNSET_PORT_VAR:-8080}").unwrap();
        assert_eq!(result, "port: 8080");
    }

    #[test]
    fn test_expand_env_vars_with_empty_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("UNSET_EMPTY_VAR") };
        assert_eq!(expand_env_vars("v: ${UNSET_EMPTY_VAR:-}").unwrap(), "v: ");
    }

    #[test]
    fn test_expand_env_vars_escaped_and_literal_dollar() {
        let result = expand_env_vars("price: $$100, cost $50, ${NOT_SET_ESC:-x}").unwrap();
        assert_eq!(result, "price: $100, cost $50, x");
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace() {
        assert!(matches!(
            expand_env_vars("value: ${VAR:-default"),
            Err(ConfigError::UnclosedVarReference)
        ));
    }
}
