/// Ramp-up pacing: connections are launched in fixed-size batches with a
/// pause between batches, bounding how fast new connections hit the target.
///
/// Batches are a pacing device only; nothing downstream groups by batch.
use std::ops::Range;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::LoadSection;
use crate::metrics::MetricsRegistry;
use crate::outcome::ConnectionId;
use crate::sampler::ServerMetricsSampler;

/// Split `total` connections into `ceil(total / batch_size)` consecutive
/// index ranges. The last batch holds the remainder.
pub fn plan(total: u64, batch_size: u64) -> Vec<Range<u64>> {
    if total == 0 || batch_size == 0 {
        return Vec::new();
    }
    (0..total.div_ceil(batch_size))
        .map(|n| {
            let start = n * batch_size;
            start..(start + batch_size).min(total)
        })
        .collect()
}

pub struct RampController {
    total: u64,
    batch_size: u64,
    inter_batch_delay: Duration,
}

impl RampController {
    pub fn new(total: u64, batch_size: u64, inter_batch_delay: Duration) -> Self {
        Self {
            total,
            batch_size,
            inter_batch_delay,
        }
    }

    pub fn from_load(load: &LoadSection) -> Self {
        Self::new(load.connections, load.batch_size, load.batch_delay())
    }

    /// Launch every batch. For each connection an attempt is recorded (which
    /// assigns its id) and `launch` is called with that id; `launch` must
    /// spawn and return without waiting for the connection.
    ///
    /// Between batches, not after the last, sleeps for the inter-batch delay
    /// and then polls the sampler once. Only those pauses are await points,
    /// so dropping this future never leaves a batch half launched.
    ///
    /// Returns the number of connections launched.
    pub async fn run<F>(
        &self,
        metrics: &MetricsRegistry,
        sampler: Option<&ServerMetricsSampler>,
        mut launch: F,
    ) -> u64
    where
        F: FnMut(ConnectionId),
    {
        let batches = plan(self.total, self.batch_size);
        let count = batches.len();
        let mut launched = 0u64;

        for (n, batch) in batches.into_iter().enumerate() {
            for _ in batch.clone() {
                let id = metrics.record_attempt();
                launch(id);
                launched += 1;
            }
            info!(
                batch = n + 1,
                batches = count,
                launched,
                total = self.total,
                "batch launched"
            );

            if n + 1 < count {
                tokio::time::sleep(self.inter_batch_delay).await;
                if let Some(sampler) = sampler {
                    sampler.poll().await;
                }
            }
        }

        debug!(launched, "ramp-up complete");
        launched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_plan_covers_every_connection_once() {
        assert_eq!(plan(10, 5), vec![0..5, 5..10]);
        assert_eq!(plan(11, 5), vec![0..5, 5..10, 10..11]);
        assert_eq!(plan(3, 10), vec![0..3]);
        assert_eq!(plan(1, 1), vec![0..1]);
        assert!(plan(0, 10).is_empty());
        assert!(plan(10, 0).is_empty());

        let batches = plan(1_003, 25);
        assert_eq!(batches.len(), 41);
        assert_eq!(batches.iter().map(|b| b.end - b.start).sum::<u64>(), 1_003);
    }

    #[tokio::test]
    async fn test_run_records_attempts_and_paces_batches() {
        let metrics = MetricsRegistry::new();
        let ramp = RampController::new(7, 3, Duration::from_millis(50));

        let mut ids = Vec::new();
        let started = Instant::now();
        let launched = ramp.run(&metrics, None, |id| ids.push(id)).await;
        let elapsed = started.elapsed();

        assert_eq!(launched, 7);
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(metrics.snapshot().attempted, 7);
        // two pauses, none after the last batch
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_single_batch_does_not_pause() {
        let metrics = MetricsRegistry::new();
        let ramp = RampController::new(4, 10, Duration::from_secs(5));

        let started = Instant::now();
        let launched = ramp.run(&metrics, None, |_| {}).await;
        assert_eq!(launched, 4);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
