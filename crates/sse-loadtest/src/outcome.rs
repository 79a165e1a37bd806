/// Terminal outcome of a single streaming connection.
use std::time::Duration;

/// Monotonically assigned per run, starting at 1, never reused.
pub type ConnectionId = u64;

/// Final classification of a connection attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    /// Stream established and closed by the server
    Success,
    /// Credential issuance failed, or subscribe answered 401
    AuthFailed(String),
    /// Subscribe answered with a non-200, non-401 status
    HttpError(u16),
    /// Transport failure before or during the stream
    NetworkError(String),
    /// 200 but not an event stream
    UnexpectedContentType(String),
    /// Aborted by the harness (idle timeout or global deadline)
    TimedOut { established: bool },
}

impl TerminalState {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AuthFailed(_) => "auth_failed",
            Self::HttpError(_) => "http_error",
            Self::NetworkError(_) => "network_error",
            Self::UnexpectedContentType(_) => "unexpected_content_type",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// Whether the attempt counts towards `succeeded`. A stream the harness
    /// had to cut off still counts, as long as it was established.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::TimedOut { established: true })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailed(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Success => "closed by server".to_string(),
            Self::AuthFailed(reason) => format!("authentication failed ({reason})"),
            Self::HttpError(status) => format!("HTTP {status}"),
            Self::NetworkError(reason) => format!("network error: {reason}"),
            Self::UnexpectedContentType(ct) => format!("unexpected content type '{ct}'"),
            Self::TimedOut { established: true } => "timed out while streaming".to_string(),
            Self::TimedOut { established: false } => "timed out before response".to_string(),
        }
    }
}

/// What a finished connection hands to the metrics registry, exactly once.
///
/// Not `Clone`; `MetricsRegistry::record_terminal` consumes it.
#[derive(Debug)]
pub struct ConnectionOutcome {
    pub id: ConnectionId,
    /// Identity the credential was issued for (`None` for anonymous runs)
    pub identity: Option<u64>,
    pub state: TerminalState,
    pub messages: u64,
    pub duration: Duration,
}

impl ConnectionOutcome {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}
