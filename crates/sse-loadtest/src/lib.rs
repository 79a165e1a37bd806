//! Load-generation harness for server-push (SSE) notification channels.
//!
//! Opens a configurable number of long-lived streaming connections against
//! a target service in paced batches, authenticates each one, records how
//! every connection ends and reports aggregate results next to the
//! server's own telemetry.

pub mod auth;
pub mod batcher;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod report;
pub mod sampler;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use orchestrator::{Phase, TestRun};
pub use outcome::{ConnectionId, ConnectionOutcome, TerminalState};
pub use report::{Grade, RunReport};
