/// One long-lived streaming subscription, driven from launch to terminal state.
///
/// A connection ends in exactly one of three ways:
/// - its own lifecycle finishes (stream closed, HTTP error, transport error)
/// - it outlives the idle timeout
/// - the harness aborts it through its cancellation token (teardown)
///
/// Whichever comes first wins; the losing branches are dropped, which also
/// drops the in-flight response and closes the socket.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sse_protocol::EVENT_STREAM;

use crate::auth::Authenticator;
use crate::metrics::MetricsRegistry;
use crate::outcome::{ConnectionId, ConnectionOutcome, TerminalState};

pub struct StreamConnection {
    http: reqwest::Client,
    url: String,
    idle_timeout: Duration,
    require_event_stream: bool,
}

#[derive(Default)]
struct Progress {
    established: bool,
    messages: u64,
}

enum Ending {
    Finished(TerminalState),
    IdleTimeout,
    Aborted,
}

impl StreamConnection {
    pub fn new(
        http: reqwest::Client,
        url: impl Into<String>,
        idle_timeout: Duration,
        require_event_stream: bool,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            idle_timeout,
            require_event_stream,
        }
    }

    /// Authenticate (when `auth` is given), subscribe and stream until a
    /// terminal state is reached. Never fails: every failure is a
    /// `TerminalState` in the returned outcome.
    pub async fn run(
        &self,
        id: ConnectionId,
        auth: Option<&Authenticator>,
        metrics: &MetricsRegistry,
        cancel: CancellationToken,
    ) -> ConnectionOutcome {
        let started = Instant::now();
        let identity = auth.map(|a| a.identity_for(id));
        let mut progress = Progress::default();

        let ending = {
            let lifecycle = self.lifecycle(id, auth, identity, metrics, &mut progress);
            tokio::pin!(lifecycle);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Ending::Aborted,
                state = &mut lifecycle => Ending::Finished(state),
                _ = tokio::time::sleep(self.idle_timeout) => Ending::IdleTimeout,
            }
        };

        let state = match ending {
            Ending::Finished(state) => state,
            Ending::IdleTimeout => {
                debug!(connection = id, "idle timeout, aborting");
                TerminalState::TimedOut { established: progress.established }
            }
            Ending::Aborted => {
                debug!(connection = id, "aborted by harness");
                TerminalState::TimedOut { established: progress.established }
            }
        };

        let duration = started.elapsed();
        debug!(
            connection = id,
            state = state.kind(),
            messages = progress.messages,
            duration_ms = duration.as_millis() as u64,
            "connection finished"
        );

        ConnectionOutcome {
            id,
            identity,
            state,
            messages: progress.messages,
            duration,
        }
    }

    async fn lifecycle(
        &self,
        id: ConnectionId,
        auth: Option<&Authenticator>,
        identity: Option<u64>,
        metrics: &MetricsRegistry,
        progress: &mut Progress,
    ) -> TerminalState {
        let credential = match (auth, identity) {
            (Some(auth), Some(identity)) => match auth.obtain_with_retry(identity).await {
                Ok(credential) => Some(credential),
                Err(e) => {
                    debug!(connection = id, identity, error = %e, "no credential");
                    return TerminalState::AuthFailed(e.to_string());
                }
            },
            _ => None,
        };

        let mut request = self
            .http
            .get(&self.url)
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(credential) = &credential {
            let (name, value) = credential.token.header();
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return TerminalState::NetworkError(e.to_string()),
        };

        let status = response.status();
        debug!(connection = id, status = status.as_u16(), "subscribe answered");

        if status == StatusCode::UNAUTHORIZED {
            if let (Some(auth), Some(credential)) = (auth, &credential) {
                auth.invalidate(credential).await;
            }
            return TerminalState::AuthFailed("subscribe answered HTTP 401".to_string());
        }
        if status != StatusCode::OK {
            return TerminalState::HttpError(status.as_u16());
        }

        if self.require_event_stream {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !content_type.contains(EVENT_STREAM) {
                return TerminalState::UnexpectedContentType(content_type.to_string());
            }
        }

        progress.established = true;

        // Chunks are counted, not parsed
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(_) => {
                    progress.messages += 1;
                    metrics.record_message();
                }
                Err(e) => return TerminalState::NetworkError(e.to_string()),
            }
        }

        TerminalState::Success
    }
}

/// Cancellation handles of the connections that are still open, by id.
///
/// Entries are removed as connections finish, so the table only ever holds
/// live connections. Aborting is idempotent.
pub struct ConnectionTable {
    root: CancellationToken,
    open: Mutex<HashMap<ConnectionId, CancellationToken>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, CancellationToken>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a launching connection and return its cancellation token.
    /// After `abort_all` the returned token is already cancelled.
    pub fn register(&self, id: ConnectionId) -> CancellationToken {
        let token = self.root.child_token();
        self.lock().insert(id, token.clone());
        token
    }

    /// Forget a connection that reached its terminal state.
    pub fn release(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    /// Abort one connection. `false` if it is no longer open.
    pub fn abort(&self, id: ConnectionId) -> bool {
        match self.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Abort every open connection; returns how many were still open.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<CancellationToken> = self.lock().drain().map(|(_, token)| token).collect();
        for token in &drained {
            token.cancel();
        }
        self.root.cancel();
        drained.len()
    }

    pub fn open_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
