/// Final run report: built once from the settled metrics snapshot, rendered
/// as a boxed text summary or as JSON.
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::{AuthMode, CredentialScope, HarnessConfig};
use crate::metrics::MetricsSnapshot;
use crate::sampler::SampleSummary;

/// Error descriptions carried into the report.
pub const RECENT_ERRORS: usize = 10;

const WIDTH: usize = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    /// At least 90% of the configured connections succeeded
    Excellent,
    /// At least 70%
    Fair,
    NeedsImprovement,
}

impl Grade {
    /// Grade against the configured connection count, not the attempted
    /// count, so a run cut short by the deadline is graded down.
    pub fn from_counts(succeeded: u64, configured: u64) -> Self {
        if configured == 0 {
            return Self::NeedsImprovement;
        }
        let scaled = succeeded.saturating_mul(100);
        if scaled >= configured.saturating_mul(90) {
            Self::Excellent
        } else if scaled >= configured.saturating_mul(70) {
            Self::Fair
        } else {
            Self::NeedsImprovement
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Fair => "FAIR",
            Self::NeedsImprovement => "NEEDS IMPROVEMENT",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub build: String,
    pub subscribe_url: String,
    pub auth_mode: AuthMode,
    pub credential_scope: CredentialScope,
    pub configured_connections: u64,
    pub batch_size: u64,
    pub batch_delay_ms: u64,
    pub duration_ms: u64,
    /// Wall time from the start of ramp-up to the end of teardown
    pub elapsed_ms: u64,
    /// Ctrl-C cut the run short
    pub interrupted: bool,
    pub credentials_issued: u64,
    pub metrics: MetricsSnapshot,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub messages_per_sec: f64,
    pub grade: Grade,
    pub recent_errors: Vec<String>,
    pub server: SampleSummary,
}

impl RunReport {
    pub fn build(
        config: &HarnessConfig,
        metrics: MetricsSnapshot,
        server: SampleSummary,
        elapsed: Duration,
        interrupted: bool,
        credentials_issued: u64,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let messages_per_sec = if secs > 0.0 { metrics.messages as f64 / secs } else { 0.0 };

        Self {
            build: sse_protocol::GIT_HASH.to_string(),
            subscribe_url: config.url(&config.target.subscribe_path),
            auth_mode: config.auth.mode,
            credential_scope: config.auth.scope,
            configured_connections: config.load.connections,
            batch_size: config.load.batch_size,
            batch_delay_ms: config.load.batch_delay_ms,
            duration_ms: config.load.duration_ms,
            elapsed_ms: elapsed.as_millis() as u64,
            interrupted,
            credentials_issued,
            success_rate: metrics.success_rate(),
            average_duration_ms: metrics.average_duration_ms(),
            min_duration_ms: metrics.min_duration_ms(),
            max_duration_ms: metrics.max_duration_ms(),
            messages_per_sec,
            grade: Grade::from_counts(metrics.succeeded, config.load.connections),
            recent_errors: metrics.recent_errors(RECENT_ERRORS).to_vec(),
            server,
            metrics,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn rule(f: &mut fmt::Formatter<'_>, left: char, right: char) -> fmt::Result {
    writeln!(f, "{left}{}{right}", "═".repeat(WIDTH))
}

fn row(f: &mut fmt::Formatter<'_>, label: &str, value: impl fmt::Display) -> fmt::Result {
    let value = value.to_string();
    writeln!(f, "║ {label:<22}{value:>27} ║")
}

fn ms(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}ms"))
}

fn gauge(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.0}"))
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;

        rule(f, '╔', '╗')?;
        writeln!(f, "║ {:^49} ║", "SSE LOAD TEST REPORT")?;
        writeln!(f, "║ {:^49} ║", format!("build {}", self.build))?;
        rule(f, '╠', '╣')?;
        writeln!(f, "║ {:<49} ║", truncate(&self.subscribe_url, 49))?;
        row(f, "Auth", format!("{:?} / {:?}", self.auth_mode, self.credential_scope))?;
        row(
            f,
            "Ramp",
            format!("{} x{} every {}ms", self.configured_connections, self.batch_size, self.batch_delay_ms),
        )?;
        row(f, "Wall time", format!("{:.1}s", self.elapsed_ms as f64 / 1000.0))?;
        if self.interrupted {
            row(f, "Interrupted", "yes")?;
        }

        rule(f, '╠', '╣')?;
        row(f, "Attempted", m.attempted)?;
        row(f, "Succeeded", m.succeeded)?;
        row(f, "Failed", m.failed)?;
        row(f, "Auth errors", m.auth_errors)?;
        row(f, "Credentials issued", self.credentials_issued)?;
        row(f, "Success rate", format!("{:.1}%", self.success_rate * 100.0))?;
        row(f, "Messages", m.messages)?;
        row(f, "Throughput", format!("{:.2} msg/s", self.messages_per_sec))?;
        row(f, "Duration avg", format!("{:.0}ms", self.average_duration_ms))?;
        row(
            f,
            "Duration min/max",
            format!("{} / {}", ms(self.min_duration_ms), ms(self.max_duration_ms)),
        )?;
        if !m.is_settled() {
            row(f, "Unsettled", m.pending())?;
        }

        if !m.breakdown.is_empty() {
            rule(f, '╠', '╣')?;
            for (kind, count) in &m.breakdown {
                row(f, kind, count)?;
            }
        }

        rule(f, '╠', '╣')?;
        let server = &self.server;
        row(f, "Server samples", server.count)?;
        row(
            f,
            "Active conns first",
            gauge(server.first.as_ref().and_then(|s| s.active_connections)),
        )?;
        row(
            f,
            "Active conns last",
            gauge(server.last.as_ref().and_then(|s| s.active_connections)),
        )?;
        row(f, "Active conns peak", gauge(server.peak_active_connections))?;
        row(
            f,
            "Memory last (MB)",
            gauge(
                server
                    .last
                    .as_ref()
                    .and_then(|s| s.memory_used_bytes)
                    .map(|b| b / (1024.0 * 1024.0)),
            ),
        )?;

        if !self.recent_errors.is_empty() {
            rule(f, '╠', '╣')?;
            writeln!(f, "║ {:<49} ║", "Recent errors")?;
            for error in &self.recent_errors {
                writeln!(f, "║ !! {:<46} ║", truncate(error, 46))?;
            }
        }

        rule(f, '╠', '╣')?;
        writeln!(f, "║ {:^49} ║", self.grade.label())?;
        rule(f, '╚', '╝')
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::outcome::{ConnectionOutcome, TerminalState};

    fn snapshot(succeeded: u64, failed: u64) -> MetricsSnapshot {
        let registry = MetricsRegistry::new();
        for n in 0..succeeded + failed {
            let id = registry.record_attempt();
            let state = if n < succeeded { TerminalState::Success } else { TerminalState::HttpError(503) };
            registry.record_message();
            registry.record_terminal(ConnectionOutcome {
                id,
                identity: Some(id),
                state,
                messages: 1,
                duration: Duration::from_millis(100 + n),
            });
        }
        registry.snapshot()
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_counts(90, 100), Grade::Excellent);
        assert_eq!(Grade::from_counts(89, 100), Grade::Fair);
        assert_eq!(Grade::from_counts(70, 100), Grade::Fair);
        assert_eq!(Grade::from_counts(69, 100), Grade::NeedsImprovement);
        assert_eq!(Grade::from_counts(0, 0), Grade::NeedsImprovement);
        assert_eq!(Grade::from_counts(9, 10), Grade::Excellent);
        assert_eq!(Grade::from_counts(u64::MAX, u64::MAX), Grade::Excellent);
        assert_eq!(Grade::from_counts(0, u64::MAX), Grade::NeedsImprovement);
    }

    #[test]
    fn test_build_derives_rates() {
        let mut config = HarnessConfig::default();
        config.load.connections = 20;

        let report = RunReport::build(
            &config,
            snapshot(15, 5),
            SampleSummary::default(),
            Duration::from_secs(10),
            false,
            20,
        );

        assert!((report.success_rate - 0.75).abs() < 1e-9);
        assert!((report.messages_per_sec - 2.0).abs() < 1e-9);
        assert_eq!(report.grade, Grade::Fair);
        assert_eq!(report.min_duration_ms, Some(100));
        assert_eq!(report.max_duration_ms, Some(119));
        assert_eq!(report.recent_errors.len(), 5);
        assert_eq!(report.subscribe_url, "http://localhost:8080/api/v1/alarms/subscribe");
    }

    #[test]
    fn test_text_and_json_rendering() {
        let report = RunReport::build(
            &HarnessConfig::default(),
            snapshot(3, 1),
            SampleSummary::default(),
            Duration::from_secs(2),
            true,
            4,
        );

        let text = report.to_string();
        assert!(text.contains("SSE LOAD TEST REPORT"));
        assert!(text.contains("NEEDS IMPROVEMENT"));
        assert!(text.contains("Interrupted"));
        assert!(text.contains("connection 4: HTTP 503"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["metrics"]["attempted"], 4);
        assert_eq!(json["grade"], "NeedsImprovement");
        assert_eq!(json["credential_scope"], "per-connection");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
