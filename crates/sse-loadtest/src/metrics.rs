/// Run-scoped metrics registry.
///
/// Every connection task reports into one `MetricsRegistry`:
/// - `record_attempt()` when the connection is launched (assigns its id)
/// - `record_message()` for each inbound chunk while streaming
/// - `record_terminal()` once, with the connection's final outcome
///
/// `snapshot()` can be called at any time, including while connections are
/// still open, and never mutates anything.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::warn;

use crate::outcome::{ConnectionId, ConnectionOutcome, TerminalState};

#[derive(Default)]
struct Tally {
    next_id: ConnectionId,
    attempted: u64,
    succeeded: u64,
    failed: u64,
    auth_errors: u64,
    durations_ms: Vec<u64>,
    errors: Vec<String>,
    terminal: HashMap<ConnectionId, TerminalState>,
}

pub struct MetricsRegistry {
    tally: Mutex<Tally>,
    /// Hot path: bumped once per chunk, kept out of the lock
    messages: AtomicU64,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub auth_errors: u64,
    pub messages: u64,
    /// Connection durations in completion order
    pub durations_ms: Vec<u64>,
    /// Failure descriptions in completion order
    pub errors: Vec<String>,
    /// Terminal state kind -> count
    pub breakdown: BTreeMap<String, u64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            tally: Mutex::new(Tally::default()),
            messages: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a new attempt and hand out its connection id.
    pub fn record_attempt(&self) -> ConnectionId {
        let mut tally = self.lock();
        tally.attempted += 1;
        tally.next_id += 1;
        tally.next_id
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection's terminal outcome. Returns `false` (and changes
    /// nothing) if the id was never attempted or already has an outcome.
    pub fn record_terminal(&self, outcome: ConnectionOutcome) -> bool {
        let mut tally = self.lock();

        if outcome.id == 0 || outcome.id > tally.next_id {
            warn!(connection = outcome.id, "terminal state for unknown connection ignored");
            return false;
        }
        if tally.terminal.contains_key(&outcome.id) {
            warn!(connection = outcome.id, "duplicate terminal state ignored");
            return false;
        }

        if outcome.state.is_success() {
            tally.succeeded += 1;
        } else {
            tally.failed += 1;
            if outcome.state.is_auth_failure() {
                tally.auth_errors += 1;
            }
            let description = format!("connection {}: {}", outcome.id, outcome.state.describe());
            tally.errors.push(description);
        }

        tally.durations_ms.push(outcome.duration_ms());
        tally.terminal.insert(outcome.id, outcome.state);
        true
    }

    /// Attempts still waiting for their terminal state.
    pub fn pending(&self) -> u64 {
        let tally = self.lock();
        tally.attempted.saturating_sub(tally.succeeded + tally.failed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tally = self.lock();
        let mut breakdown = BTreeMap::new();
        for state in tally.terminal.values() {
            *breakdown.entry(state.kind().to_string()).or_insert(0) += 1;
        }

        MetricsSnapshot {
            attempted: tally.attempted,
            succeeded: tally.succeeded,
            failed: tally.failed,
            auth_errors: tally.auth_errors,
            messages: self.messages.load(Ordering::Relaxed),
            durations_ms: tally.durations_ms.clone(),
            errors: tally.errors.clone(),
            breakdown,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSnapshot {
    /// Attempts that have not reported a terminal state yet.
    pub fn pending(&self) -> u64 {
        self.attempted.saturating_sub(self.succeeded + self.failed)
    }

    /// `attempted == succeeded + failed`
    pub fn is_settled(&self) -> bool {
        self.pending() == 0
    }

    /// Fraction in `0.0..=1.0`; zero when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.durations_ms.is_empty() {
            0.0
        } else {
            self.durations_ms.iter().sum::<u64>() as f64 / self.durations_ms.len() as f64
        }
    }

    pub fn min_duration_ms(&self) -> Option<u64> {
        self.durations_ms.iter().copied().min()
    }

    pub fn max_duration_ms(&self) -> Option<u64> {
        self.durations_ms.iter().copied().max()
    }

    /// The most recent `n` failure descriptions, oldest first.
    pub fn recent_errors(&self, n: usize) -> &[String] {
        let start = self.errors.len().saturating_sub(n);
        &self.errors[start..]
    }
}
