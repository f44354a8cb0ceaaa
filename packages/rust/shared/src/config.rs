//! Application configuration for LeadForge.
//!
//! User config lives at `~/.leadforge/leadforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never written to the file: each section names the env var
//! that holds them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadForgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadforge";

// ---------------------------------------------------------------------------
// Config structs (matching leadforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,

    #[serde(default)]
    pub sequences: SequenceWorkerConfig,

    #[serde(default)]
    pub calls: CallRetryConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.leadforge/leadforge.db".into()
}

impl DatabaseConfig {
    /// Database path with a leading `~/` expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the webhook/submission server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Externally reachable base URL, used to build provider callback URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Allowed browser origins for the public submission endpoint. Empty allows any.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".into()
}
fn default_public_base_url() -> String {
    "http://localhost:8000".into()
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_ai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// API base URL; the client appends `/v1/messages`.
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_ai_key_env(),
            model: default_ai_model(),
            endpoint: default_ai_endpoint(),
            max_tokens: default_ai_max_tokens(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

fn default_ai_key_env() -> String {
    "CLAUDE_API_KEY".into()
}
fn default_ai_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_ai_endpoint() -> String {
    "https://api.anthropic.com".into()
}
fn default_ai_max_tokens() -> u32 {
    1024
}
fn default_ai_timeout() -> u64 {
    30
}

/// `[smtp]` section. An empty `host` disables email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    /// Name of the env var holding the SMTP password.
    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,

    /// Sender address; falls back to `user` when empty.
    #[serde(default)]
    pub from: String,

    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            user: String::new(),
            password_env: default_smtp_password_env(),
            from: String::new(),
            timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_password_env() -> String {
    "SMTP_PASS".into()
}
fn default_smtp_timeout() -> u64 {
    15
}

/// `[twilio]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default = "default_twilio_sid_env")]
    pub account_sid_env: String,

    #[serde(default = "default_twilio_token_env")]
    pub auth_token_env: String,

    /// Env var holding the shared secret embedded in callback URLs.
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,

    /// REST API base, overridable for testing.
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,

    #[serde(default = "default_twilio_timeout")]
    pub timeout_secs: u64,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid_env: default_twilio_sid_env(),
            auth_token_env: default_twilio_token_env(),
            webhook_secret_env: default_webhook_secret_env(),
            api_base: default_twilio_api_base(),
            timeout_secs: default_twilio_timeout(),
        }
    }
}

fn default_twilio_sid_env() -> String {
    "TWILIO_ACCOUNT_SID".into()
}
fn default_twilio_token_env() -> String {
    "TWILIO_AUTH_TOKEN".into()
}
fn default_webhook_secret_env() -> String {
    "TWILIO_WEBHOOK_SECRET".into()
}
fn default_twilio_api_base() -> String {
    "https://api.twilio.com/2010-04-01".into()
}
fn default_twilio_timeout() -> u64 {
    15
}

/// Fallback webhook secret when the env var is unset (development only).
pub const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";

/// `[sequences]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceWorkerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum due records processed per worker pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SequenceWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_batch_size() -> u32 {
    50
}

/// `[calls]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRetryConfig {
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Total attempt cap; retries stop once the counter reaches it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for CallRetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_delay() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Secret resolution
// ---------------------------------------------------------------------------

/// Read a secret from the named env var. Unset and empty both mean absent.
pub fn secret_from_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Twilio credentials, if both halves are present.
pub fn twilio_credentials(config: &TwilioConfig) -> Option<(String, String)> {
    let sid = secret_from_env(&config.account_sid_env)?;
    let token = secret_from_env(&config.auth_token_env)?;
    Some((sid, token))
}

/// The webhook secret, falling back to [`DEV_WEBHOOK_SECRET`].
pub fn webhook_secret(config: &TwilioConfig) -> String {
    secret_from_env(&config.webhook_secret_env).unwrap_or_else(|| {
        tracing::warn!(
            var = %config.webhook_secret_env,
            "webhook secret not set, using development default"
        );
        DEV_WEBHOOK_SECRET.to_string()
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadforge/leadforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LeadForgeError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadForgeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LeadForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject values no component can work with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    url::Url::parse(&config.server.public_base_url).map_err(|e| {
        LeadForgeError::config(format!(
            "server.public_base_url '{}' is not a valid URL: {e}",
            config.server.public_base_url
        ))
    })?;
    if config.sequences.batch_size == 0 {
        return Err(LeadForgeError::config("sequences.batch_size must be at least 1"));
    }
    if config.sequences.poll_interval_secs == 0 {
        return Err(LeadForgeError::config(
            "sequences.poll_interval_secs must be at least 1",
        ));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("CLAUDE_API_KEY"));
        assert!(toml_str.contains("TWILIO_ACCOUNT_SID"));
        assert!(toml_str.contains("poll_interval_secs"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.sequences.batch_size, 50);
        assert_eq!(parsed.calls.max_attempts, 2);
        assert_eq!(parsed.calls.retry_delay_secs, 120);
        assert_eq!(parsed.smtp.port, 587);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[smtp]
host = "smtp.example.com"
user = "alerts@example.com"

[sequences]
batch_size = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.smtp.host, "smtp.example.com");
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.sequences.batch_size, 10);
        assert_eq!(config.sequences.poll_interval_secs, 60);
        assert_eq!(config.ai.timeout_secs, 30);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = AppConfig::default();
        config.sequences.batch_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn rejects_bad_public_url() {
        let mut config = AppConfig::default();
        config.server.public_base_url = "not a url".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_secrets_resolve_to_none() {
        let config = TwilioConfig {
            account_sid_env: "LF_TEST_NONEXISTENT_SID_12345".into(),
            auth_token_env: "LF_TEST_NONEXISTENT_TOKEN_12345".into(),
            webhook_secret_env: "LF_TEST_NONEXISTENT_SECRET_12345".into(),
            ..TwilioConfig::default()
        };
        assert!(twilio_credentials(&config).is_none());
        assert_eq!(webhook_secret(&config), DEV_WEBHOOK_SECRET);
    }

    #[test]
    fn absolute_db_path_is_untouched() {
        let db = DatabaseConfig {
            path: "/var/lib/leadforge.db".into(),
        };
        assert_eq!(db.resolved_path().unwrap(), PathBuf::from("/var/lib/leadforge.db"));
    }
}
