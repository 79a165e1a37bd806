/// Harness configuration.
///
/// Loaded from an optional TOML file; every field has a default so an empty
/// file (or no file at all) describes the stock run: 100 connections in
/// batches of 10, 200ms apart, held for 30s against `localhost:8080`.
///
/// ```toml
/// [target]
/// base_url = "http://localhost:8080"
///
/// [auth]
/// scope = "shared"
///
/// [load]
/// connections = 500
/// batch_size = 25
/// ```
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Longest credential lifetime a run accepts (one week)
pub const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub load: LoadSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_subscribe_path")]
    pub subscribe_path: String,
    /// GET once before ramp-up; a failure aborts the run
    #[serde(default = "default_true")]
    pub health_check: bool,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Reject 200 responses that are not `text/event-stream`
    #[serde(default = "default_true")]
    pub require_event_stream: bool,
}

/// Whether subscribe requests carry a credential at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Anonymous subscribe
    None,
    /// Credential obtained from the issuance endpoint
    Issued,
}

/// Credential sharing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialScope {
    /// One identity per connection, nothing shared or cached
    PerConnection,
    /// One identity for the whole run, cached until expiry
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,
    #[serde(default = "default_scope")]
    pub scope: CredentialScope,
    #[serde(default = "default_issue_method")]
    pub issue_method: IssueMethod,
    /// `{id}` is replaced by the identity id
    #[serde(default = "default_issue_path")]
    pub issue_path: String,
    #[serde(default = "default_cookie_names")]
    pub cookie_names: Vec<String>,
    /// JSON pointers tried in order when no token cookie is present
    #[serde(default = "default_token_pointers")]
    pub token_pointers: Vec<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Identity used for every connection under the shared scope
    #[serde(default = "default_shared_identity")]
    pub shared_identity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSection {
    #[serde(default = "default_connections")]
    pub connections: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Global test duration, measured from the start of ramp-up
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Maximum lifetime of a single connection
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How long teardown waits for aborted connections to report
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
    /// End Hold before the deadline once every connection has finished
    #[serde(default)]
    pub stop_when_settled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_telemetry_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_telemetry_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_active_connections_path")]
    pub active_connections_path: String,
    #[serde(default = "default_memory_used_path")]
    pub memory_used_path: String,
    #[serde(default = "default_notifications_sent_path")]
    pub notifications_sent_path: String,
}

fn default_base_url() -> String { sse_protocol::DEFAULT_BASE_URL.to_string() }
fn default_subscribe_path() -> String { sse_protocol::DEFAULT_SUBSCRIBE_PATH.to_string() }
fn default_health_path() -> String { sse_protocol::DEFAULT_HEALTH_PATH.to_string() }
fn default_true() -> bool { true }
fn default_auth_mode() -> AuthMode { AuthMode::Issued }
fn default_scope() -> CredentialScope { CredentialScope::PerConnection }
fn default_issue_method() -> IssueMethod { IssueMethod::Post }
fn default_issue_path() -> String { sse_protocol::DEFAULT_ISSUE_PATH.to_string() }
fn default_cookie_names() -> Vec<String> {
    sse_protocol::DEFAULT_COOKIE_NAMES.iter().map(|s| s.to_string()).collect()
}
fn default_token_pointers() -> Vec<String> {
    sse_protocol::DEFAULT_TOKEN_POINTERS.iter().map(|s| s.to_string()).collect()
}
fn default_ttl_secs() -> u64 { sse_protocol::DEFAULT_CREDENTIAL_TTL_SECS }
fn default_shared_identity() -> u64 { 1 }
fn default_connections() -> u64 { sse_protocol::DEFAULT_CONNECTIONS }
fn default_batch_size() -> u64 { sse_protocol::DEFAULT_BATCH_SIZE }
fn default_batch_delay_ms() -> u64 { sse_protocol::DEFAULT_BATCH_DELAY_MS }
fn default_duration_ms() -> u64 { sse_protocol::DEFAULT_DURATION_SECS * 1000 }
fn default_idle_timeout_ms() -> u64 { sse_protocol::DEFAULT_IDLE_TIMEOUT_SECS * 1000 }
fn default_teardown_grace_ms() -> u64 { sse_protocol::DEFAULT_TEARDOWN_GRACE_MS }
fn default_telemetry_interval_ms() -> u64 { sse_protocol::DEFAULT_TELEMETRY_INTERVAL_MS }
fn default_telemetry_timeout_ms() -> u64 { sse_protocol::DEFAULT_TELEMETRY_TIMEOUT_MS }
fn default_active_connections_path() -> String { sse_protocol::DEFAULT_ACTIVE_CONNECTIONS_PATH.to_string() }
fn default_memory_used_path() -> String { sse_protocol::DEFAULT_MEMORY_USED_PATH.to_string() }
fn default_notifications_sent_path() -> String { sse_protocol::DEFAULT_NOTIFICATIONS_SENT_PATH.to_string() }

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            subscribe_path: default_subscribe_path(),
            health_check: true,
            health_path: default_health_path(),
            require_event_stream: true,
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            scope: default_scope(),
            issue_method: default_issue_method(),
            issue_path: default_issue_path(),
            cookie_names: default_cookie_names(),
            token_pointers: default_token_pointers(),
            ttl_secs: default_ttl_secs(),
            shared_identity: default_shared_identity(),
        }
    }
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            duration_ms: default_duration_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            teardown_grace_ms: default_teardown_grace_ms(),
            stop_when_settled: false,
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_telemetry_interval_ms(),
            request_timeout_ms: default_telemetry_timeout_ms(),
            active_connections_path: default_active_connections_path(),
            memory_used_path: default_memory_used_path(),
            notifications_sent_path: default_notifications_sent_path(),
        }
    }
}

impl LoadSection {
    pub fn batch_delay(&self) -> Duration { Duration::from_millis(self.batch_delay_ms) }
    pub fn duration(&self) -> Duration { Duration::from_millis(self.duration_ms) }
    pub fn idle_timeout(&self) -> Duration { Duration::from_millis(self.idle_timeout_ms) }
    pub fn teardown_grace(&self) -> Duration { Duration::from_millis(self.teardown_grace_ms) }
}

impl TelemetrySection {
    pub fn interval(&self) -> Duration { Duration::from_millis(self.interval_ms) }
    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
}

impl HarnessConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, HarnessError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from disk.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path).map_err(|source| HarnessError::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        let url = &self.target.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HarnessError::Config(format!("base_url must be http(s), got '{url}'")));
        }
        if self.load.connections == 0 {
            return Err(HarnessError::Config("connections must be at least 1".into()));
        }
        if self.load.batch_size == 0 {
            return Err(HarnessError::Config("batch_size must be at least 1".into()));
        }
        if self.load.duration_ms == 0 {
            return Err(HarnessError::Config("duration must be greater than zero".into()));
        }
        if self.load.idle_timeout_ms == 0 {
            return Err(HarnessError::Config("idle timeout must be greater than zero".into()));
        }
        if self.auth.mode == AuthMode::Issued && self.auth.issue_path.trim().is_empty() {
            return Err(HarnessError::Config("issue_path is required when auth mode is 'issued'".into()));
        }
        if self.auth.ttl_secs > MAX_TTL_SECS {
            return Err(HarnessError::Config(format!(
                "credential ttl_secs must be at most {MAX_TTL_SECS}, got {}",
                self.auth.ttl_secs
            )));
        }
        if self.telemetry.enabled && self.telemetry.interval_ms == 0 {
            return Err(HarnessError::Config("telemetry interval must be greater than zero".into()));
        }
        Ok(())
    }

    /// Full URL of an endpoint path on the target service.
    pub fn url(&self, path: &str) -> String {
        sse_protocol::join_url(&self.target.base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config.load.connections, 100);
        assert_eq!(config.load.batch_size, 10);
        assert_eq!(config.load.batch_delay(), Duration::from_millis(200));
        assert_eq!(config.load.duration(), Duration::from_secs(30));
        assert_eq!(config.load.idle_timeout(), Duration::from_secs(35));
        assert!(!config.load.stop_when_settled);
        assert_eq!(config.auth.mode, AuthMode::Issued);
        assert_eq!(config.auth.scope, CredentialScope::PerConnection);
        assert_eq!(config.auth.issue_method, IssueMethod::Post);
        assert_eq!(config.auth.ttl_secs, 840);
        assert!(config.target.health_check);
        assert_eq!(config.target.health_path, "/actuator/health");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
            [target]
            base_url = "http://backend:8080/"
            require_event_stream = false
            health_check = false

            [auth]
            mode = "issued"
            scope = "shared"
            issue_method = "GET"
            issue_path = "/api/v1/test/jwt"

            [load]
            connections = 50
            batch_size = 5
            batch_delay_ms = 100

            [telemetry]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.scope, CredentialScope::Shared);
        assert_eq!(config.auth.issue_method, IssueMethod::Get);
        assert_eq!(config.load.connections, 50);
        assert_eq!(config.load.batch_delay_ms, 100);
        assert!(!config.telemetry.enabled);
        assert!(!config.target.require_event_stream);
        assert!(!config.target.health_check);
        assert_eq!(config.url("/api/v1/alarms/subscribe"), "http://backend:8080/api/v1/alarms/subscribe");
    }

    #[test]
    fn test_validate_rejects_degenerate_runs() {
        let mut config = HarnessConfig::default();
        config.load.batch_size = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        let mut config = HarnessConfig::default();
        config.load.connections = 0;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.target.base_url = "localhost:8080".into();
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.auth.issue_path = " ".into();
        assert!(config.validate().is_err());
        config.auth.mode = AuthMode::None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds_credential_ttl() {
        let mut config = HarnessConfig::default();
        config.auth.ttl_secs = MAX_TTL_SECS;
        assert!(config.validate().is_ok());

        config.auth.ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert!(err.to_string().contains("ttl_secs"));
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        assert!(matches!(
            HarnessConfig::from_toml("[load]\nconnections = \"many\""),
            Err(HarnessError::ConfigParse(_))
        ));
    }
}
