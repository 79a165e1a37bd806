use thiserror::Error;

/// Errors that stop a run (or never let it start).
///
/// Per-connection failures are not errors at this level: they end up as a
/// `TerminalState` in the metrics registry.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("health check against {url} failed: {reason}")]
    HealthCheck { url: String, reason: String },
}
