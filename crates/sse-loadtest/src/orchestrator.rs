/// Test run sequencing: Setup -> RampUp -> Hold -> Teardown -> Reported.
///
/// A `TestRun` owns everything scoped to one run (HTTP client, metrics,
/// credential cache, sampler, open-connection table, task tracker) and is
/// consumed by `execute`, so nothing leaks from one run into the next.
///
/// Connections are fire-and-forget tasks on the run's `TaskTracker`; the
/// orchestrator only observes them through the metrics registry. At the
/// deadline every connection still open is aborted through its
/// cancellation token, and teardown waits (bounded by the grace period)
/// for the aborted tasks to record their terminal state.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::batcher::RampController;
use crate::config::{AuthMode, HarnessConfig};
use crate::connection::{ConnectionTable, StreamConnection};
use crate::error::HarnessError;
use crate::metrics::MetricsRegistry;
use crate::outcome::ConnectionId;
use crate::report::RunReport;
use crate::sampler::{SampleSummary, ServerMetricsSampler};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// How often Hold checks whether every connection has finished (only with
/// `stop_when_settled`)
const SETTLE_CHECK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    RampUp,
    Hold,
    Teardown,
    Reported,
}

/// HTTP client shared by every request of a run. No overall request
/// timeout: streams are bounded by the idle timeout instead.
pub fn http_client() -> Result<reqwest::Client, HarnessError> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("sse-loadtest/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

pub struct TestRun {
    config: HarnessConfig,
    http: reqwest::Client,
    metrics: Arc<MetricsRegistry>,
    auth: Option<Arc<Authenticator>>,
    sampler: Option<Arc<ServerMetricsSampler>>,
    connection: Arc<StreamConnection>,
    connections: Arc<ConnectionTable>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    phase: Phase,
}

impl TestRun {
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let http = http_client()?;

        let auth = match config.auth.mode {
            AuthMode::Issued => Some(Arc::new(Authenticator::new(
                http.clone(),
                config.target.base_url.clone(),
                config.auth.clone(),
            ))),
            AuthMode::None => None,
        };
        let sampler = config
            .telemetry
            .enabled
            .then(|| Arc::new(ServerMetricsSampler::new(http.clone(), &config)));
        let connection = Arc::new(StreamConnection::new(
            http.clone(),
            config.url(&config.target.subscribe_path),
            config.load.idle_timeout(),
            config.target.require_event_stream,
        ));

        Ok(Self {
            config,
            http,
            metrics: Arc::new(MetricsRegistry::new()),
            auth,
            sampler,
            connection,
            connections: Arc::new(ConnectionTable::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            phase: Phase::Setup,
        })
    }

    /// Cancelling this token moves a running test straight to Teardown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Live view of the run's metrics; readable while `execute` runs.
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        info!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }

    /// GET the health endpoint; anything but a 200 aborts the run.
    pub async fn health_check(&self) -> Result<(), HarnessError> {
        let url = self.config.url(&self.config.target.health_path);
        let response = self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| HarnessError::HealthCheck { url: url.clone(), reason: e.to_string() })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(HarnessError::HealthCheck { url, reason: format!("HTTP {}", status.as_u16()) });
        }
        info!(%url, "target healthy");
        Ok(())
    }

    fn launch(&self, id: ConnectionId) {
        let cancel = self.connections.register(id);
        let connection = Arc::clone(&self.connection);
        let auth = self.auth.clone();
        let metrics = Arc::clone(&self.metrics);
        let table = Arc::clone(&self.connections);

        self.tracker.spawn(async move {
            let outcome = connection.run(id, auth.as_deref(), &metrics, cancel).await;
            table.release(id);
            metrics.record_terminal(outcome);
        });
    }

    fn log_progress(&self) {
        let snap = self.metrics.snapshot();
        info!(
            attempted = snap.attempted,
            succeeded = snap.succeeded,
            failed = snap.failed,
            messages = snap.messages,
            open = self.connections.open_count(),
            "progress"
        );
    }

    /// Run every phase and produce the report. Only a failed health check
    /// (or bad configuration) is an error; connection failures are data.
    pub async fn execute(mut self) -> Result<RunReport, HarnessError> {
        // ── Setup ──
        info!(
            base_url = %self.config.target.base_url,
            connections = self.config.load.connections,
            batch_size = self.config.load.batch_size,
            duration_ms = self.config.load.duration_ms,
            "starting run"
        );
        if self.config.target.health_check {
            self.health_check().await?;
        }
        if let Some(sampler) = &self.sampler {
            sampler.poll().await;
        }

        // ── RampUp ──
        self.enter(Phase::RampUp);
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.load.duration();
        let sampler_handle = self
            .sampler
            .clone()
            .map(|s| s.spawn(self.config.telemetry.interval(), CancellationToken::new()));

        let mut interrupted = false;
        let mut deadline_hit = false;
        {
            let ramp = RampController::from_load(&self.config.load);
            let run = &self;
            tokio::select! {
                launched = ramp.run(&run.metrics, run.sampler.as_deref(), |id| run.launch(id)) => {
                    info!(launched, "all batches launched");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        launched = run.metrics.snapshot().attempted,
                        "deadline reached during ramp-up, remaining batches skipped"
                    );
                    deadline_hit = true;
                }
                _ = run.shutdown.cancelled() => {
                    warn!("interrupted during ramp-up");
                    interrupted = true;
                }
            }
        }

        // ── Hold ──
        if !interrupted && !deadline_hit {
            self.enter(Phase::Hold);
            let every = self.config.telemetry.interval().max(Duration::from_millis(100));
            let mut progress = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut settle = tokio::time::interval(SETTLE_CHECK);
            let stop_when_settled = self.config.load.stop_when_settled;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.shutdown.cancelled() => {
                        warn!("interrupted during hold");
                        interrupted = true;
                        break;
                    }
                    _ = progress.tick() => self.log_progress(),
                    _ = settle.tick(), if stop_when_settled => {
                        if self.metrics.pending() == 0 {
                            info!("every connection has finished, ending hold early");
                            break;
                        }
                    }
                }
            }
        }

        // ── Teardown ──
        self.enter(Phase::Teardown);
        let aborted = self.connections.abort_all();
        if aborted > 0 {
            info!(aborted, "aborting open connections");
        }
        self.tracker.close();

        let grace = self.config.load.teardown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                pending = self.metrics.pending(),
                grace_ms = grace.as_millis() as u64,
                "connections still unsettled after teardown grace"
            );
        }

        if let Some(handle) = sampler_handle {
            handle.stop().await;
        }
        let server = match &self.sampler {
            Some(sampler) => {
                sampler.poll().await;
                sampler.summary()
            }
            None => SampleSummary::default(),
        };
        let elapsed = started.elapsed();

        // ── Reported ──
        self.enter(Phase::Reported);
        let issued = self.auth.as_ref().map_or(0, |a| a.issued_count());
        Ok(RunReport::build(
            &self.config,
            self.metrics.snapshot(),
            server,
            elapsed,
            interrupted,
            issued,
        ))
    }
}
