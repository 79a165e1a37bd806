pub mod credential;
pub mod telemetry;

/// Short git hash of the build, stamped into every report header
pub const GIT_HASH: &str = env!("SSE_LOADTEST_GIT_HASH");
pub const BUILD_TIME: &str = env!("SSE_LOADTEST_BUILD_TIME");

/// Content type a subscribe endpoint must answer with
pub const EVENT_STREAM: &str = "text/event-stream";

/// Default target service
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default endpoint paths
pub const DEFAULT_SUBSCRIBE_PATH: &str = "/api/v1/alarms/subscribe";
pub const DEFAULT_ISSUE_PATH: &str = "/api/v1/test/jwt?userId={id}&nickname=testuser{id}";
pub const DEFAULT_HEALTH_PATH: &str = "/actuator/health";
pub const DEFAULT_ACTIVE_CONNECTIONS_PATH: &str = "/actuator/metrics/sse.connections.active";
pub const DEFAULT_MEMORY_USED_PATH: &str = "/actuator/metrics/jvm.memory.used";
pub const DEFAULT_NOTIFICATIONS_SENT_PATH: &str = "/actuator/metrics/notifications.sent";

/// Placeholder substituted with the identity id in issuance path templates
pub const IDENTITY_PLACEHOLDER: &str = "{id}";

/// Credential lookup defaults
pub const DEFAULT_COOKIE_NAMES: &[&str] = &["accessToken", "refreshToken"];
pub const DEFAULT_TOKEN_POINTERS: &[&str] = &["/token", "/data/accessToken", "/accessToken"];
/// Cached credentials are reused for 14 minutes
pub const DEFAULT_CREDENTIAL_TTL_SECS: u64 = 14 * 60;

/// Load defaults
pub const DEFAULT_CONNECTIONS: u64 = 100;
pub const DEFAULT_BATCH_SIZE: u64 = 10;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 200;
pub const DEFAULT_DURATION_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 35;
pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 2000;

/// Telemetry defaults
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_TELEMETRY_TIMEOUT_MS: u64 = 5000;

/// Substitute the identity id into an issuance path template.
pub fn expand_identity(template: &str, identity: u64) -> String {
    template.replace(IDENTITY_PLACEHOLDER, &identity.to_string())
}

/// Join a base URL and an endpoint path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
