/// Server-side telemetry sampling.
///
/// Reads the target service's own gauges (open push connections, memory in
/// use, notifications sent) on a fixed interval, independent of the ramp.
/// Purely observational: a failed sample is logged and dropped, never fatal,
/// and never touches connection outcomes.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sse_protocol::telemetry::{parse_gauge, Gauge, TelemetryError};

use crate::config::HarnessConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerSample {
    /// Milliseconds since the sampler was created
    pub elapsed_ms: u64,
    /// Wall clock, ms since the Unix epoch
    pub timestamp_ms: u64,
    pub active_connections: Option<f64>,
    pub memory_used_bytes: Option<f64>,
    pub notifications_sent: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("telemetry request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("telemetry endpoint {url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("telemetry endpoint {url}: {source}")]
    Telemetry {
        url: String,
        #[source]
        source: TelemetryError,
    },
    #[error("no telemetry endpoint answered")]
    AllFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub first: Option<ServerSample>,
    pub last: Option<ServerSample>,
    pub peak_active_connections: Option<f64>,
}

pub struct ServerMetricsSampler {
    http: reqwest::Client,
    request_timeout: Duration,
    active_connections_url: String,
    memory_used_url: String,
    notifications_sent_url: String,
    started: Instant,
    history: Mutex<Vec<ServerSample>>,
}

/// A running periodic sampler. `stop` cancels the timer and waits for the
/// task to exit.
pub struct SamplerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerMetricsSampler {
    pub fn new(http: reqwest::Client, config: &HarnessConfig) -> Self {
        let telemetry = &config.telemetry;
        Self {
            http,
            request_timeout: telemetry.request_timeout(),
            active_connections_url: config.url(&telemetry.active_connections_path),
            memory_used_url: config.url(&telemetry.memory_used_path),
            notifications_sent_url: config.url(&telemetry.notifications_sent_path),
            started: Instant::now(),
            history: Mutex::new(Vec::new()),
        }
    }

    fn url(&self, gauge: Gauge) -> &str {
        match gauge {
            Gauge::ActiveConnections => &self.active_connections_url,
            Gauge::MemoryUsed => &self.memory_used_url,
            Gauge::NotificationsSent => &self.notifications_sent_url,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServerSample>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read one gauge.
    pub async fn read_gauge(&self, gauge: Gauge) -> Result<f64, SamplerError> {
        let url = self.url(gauge);
        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SamplerError::Network { url: url.to_string(), reason: e.to_string() })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SamplerError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SamplerError::Network { url: url.to_string(), reason: e.to_string() })?;
        parse_gauge(&body).map_err(|source| SamplerError::Telemetry { url: url.to_string(), source })
    }

    /// Read all gauges concurrently. Individual failures are logged and
    /// leave their field empty; only a sample with no value at all is an
    /// error.
    pub async fn sample(&self) -> Result<ServerSample, SamplerError> {
        let (active, memory, notifications) = tokio::join!(
            self.read_gauge(Gauge::ActiveConnections),
            self.read_gauge(Gauge::MemoryUsed),
            self.read_gauge(Gauge::NotificationsSent),
        );

        let keep = |gauge: Gauge, result: Result<f64, SamplerError>| match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(gauge = gauge.as_str(), error = %e, "telemetry read failed");
                None
            }
        };

        let sample = ServerSample {
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            timestamp_ms: now_ms(),
            active_connections: keep(Gauge::ActiveConnections, active),
            memory_used_bytes: keep(Gauge::MemoryUsed, memory),
            notifications_sent: keep(Gauge::NotificationsSent, notifications),
        };

        if sample.active_connections.is_none()
            && sample.memory_used_bytes.is_none()
            && sample.notifications_sent.is_none()
        {
            return Err(SamplerError::AllFailed);
        }
        Ok(sample)
    }

    /// Sample, log and keep the result. Never fails.
    pub async fn poll(&self) -> Option<ServerSample> {
        match self.sample().await {
            Ok(sample) => {
                info!(
                    active_connections = ?sample.active_connections,
                    memory_mb = ?sample.memory_used_bytes.map(|b| (b / (1024.0 * 1024.0)).round()),
                    notifications_sent = ?sample.notifications_sent,
                    "server sample"
                );
                self.record(sample.clone());
                Some(sample)
            }
            Err(e) => {
                warn!(error = %e, "server sample skipped");
                None
            }
        }
    }

    pub fn record(&self, sample: ServerSample) {
        self.lock().push(sample);
    }

    pub fn summary(&self) -> SampleSummary {
        let history = self.lock();
        SampleSummary {
            count: history.len(),
            first: history.first().cloned(),
            last: history.last().cloned(),
            peak_active_connections: history
                .iter()
                .filter_map(|s| s.active_connections)
                .reduce(f64::max),
        }
    }

    /// Poll every `interval` until stopped. The first poll happens one
    /// interval from now.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> SamplerHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.poll() => {}
                }
            }
            debug!("sampler stopped");
        });

        SamplerHandle { cancel, task }
    }
}

impl SamplerHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "sampler task ended abnormally");
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
