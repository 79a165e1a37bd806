//! In-process fake target service for the harness integration tests.
//!
//! Serves the four endpoint families the harness talks to (health,
//! credential issuance, subscribe, telemetry) on an ephemeral localhost
//! port, with the behavior of each selected per test.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio::task::JoinHandle;

use sse_loadtest::config::AuthMode;
use sse_loadtest::HarnessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    /// Token in the JSON body at `/data/accessToken`
    Json,
    /// Token in `Set-Cookie` headers
    Cookie,
    /// Always 401
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// One event, then the server closes the stream
    CloseImmediately,
    /// One event, then the stream stays open forever
    NeverClose,
    /// Plain status code, no stream
    Status(u16),
    /// 200 with an HTML body
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    Valid,
    Malformed,
}

#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    pub healthy: bool,
    pub issue: Issue,
    pub stream: Stream,
    pub telemetry: Telemetry,
    /// Subscribe answers 401 without a bearer token or token cookie
    pub require_auth: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            healthy: true,
            issue: Issue::Json,
            stream: Stream::CloseImmediately,
            telemetry: Telemetry::Valid,
            require_auth: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Hits {
    pub health: AtomicU64,
    pub issue: AtomicU64,
    pub subscribe: AtomicU64,
    pub telemetry: AtomicU64,
}

impl Hits {
    pub fn issue(&self) -> u64 {
        self.issue.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> u64 {
        self.subscribe.load(Ordering::SeqCst)
    }

    pub fn telemetry(&self) -> u64 {
        self.telemetry.load(Ordering::SeqCst)
    }
}

struct Shared {
    behavior: Behavior,
    hits: Arc<Hits>,
}

type AppState = Arc<Shared>;

pub struct FakeService {
    pub base_url: String,
    pub hits: Arc<Hits>,
    task: JoinHandle<()>,
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start(behavior: Behavior) -> FakeService {
    let hits = Arc::new(Hits::default());
    let state = Arc::new(Shared {
        behavior,
        hits: Arc::clone(&hits),
    });

    let app = Router::new()
        .route("/actuator/health", get(health))
        .route("/api/v1/test/jwt", get(issue).post(issue))
        .route("/api/v1/alarms/subscribe", get(subscribe))
        .route("/actuator/metrics/:name", get(metric))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake service");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake service");
    });

    FakeService {
        base_url: format!("http://{addr}"),
        hits,
        task,
    }
}

/// A small, fast run against `base_url`: issued per-connection credentials,
/// health check and telemetry on, Hold ends once everything has finished.
pub fn config(base_url: &str) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.target.base_url = base_url.to_string();
    config.auth.mode = AuthMode::Issued;
    config.load.connections = 10;
    config.load.batch_size = 5;
    config.load.batch_delay_ms = 200;
    config.load.duration_ms = 10_000;
    config.load.idle_timeout_ms = 30_000;
    config.load.teardown_grace_ms = 2_000;
    config.load.stop_when_settled = true;
    config.telemetry.interval_ms = 200;
    config.telemetry.request_timeout_ms = 1_000;
    config
}

async fn health(State(state): State<AppState>) -> Response {
    state.hits.health.fetch_add(1, Ordering::SeqCst);
    if state.behavior.healthy {
        Json(json!({ "status": "UP" })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "DOWN" }))).into_response()
    }
}

async fn issue(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let n = state.hits.issue.fetch_add(1, Ordering::SeqCst) + 1;
    let user = query.get("userId").cloned().unwrap_or_else(|| "anonymous".to_string());

    match state.behavior.issue {
        Issue::Json => Json(json!({
            "success": true,
            "data": { "accessToken": format!("{user}-{n}"), "expiresIn": 900 }
        }))
        .into_response(),
        Issue::Cookie => Response::builder()
            .header(SET_COOKIE, format!("accessToken={user}-{n}; Path=/; HttpOnly"))
            .header(SET_COOKIE, format!("refreshToken=refresh-{n}; Path=/; HttpOnly"))
            .header(SET_COOKIE, "theme=dark; Path=/")
            .body(Body::from("{}"))
            .expect("cookie response"),
        Issue::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "));
    let cookie = headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("accessToken="));
    bearer || cookie
}

fn event_stream(body: Body) -> Response {
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("event stream response")
}

async fn subscribe(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.hits.subscribe.fetch_add(1, Ordering::SeqCst);

    if state.behavior.require_auth && !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.behavior.stream {
        Stream::CloseImmediately => event_stream(Body::from("event: connect\ndata: connected\n\n")),
        Stream::NeverClose => {
            let events = stream::once(async { Ok::<_, Infallible>("event: connect\ndata: connected\n\n") })
                .chain(stream::pending());
            event_stream(Body::from_stream(events))
        }
        Stream::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Stream::Html => ([(CONTENT_TYPE, "text/html")], "<html><body>login</body></html>").into_response(),
    }
}

async fn metric(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    state.hits.telemetry.fetch_add(1, Ordering::SeqCst);

    match state.behavior.telemetry {
        Telemetry::Valid => Json(json!({
            "name": name,
            "measurements": [ { "statistic": "VALUE", "value": state.hits.subscribe() as f64 } ],
            "availableTags": []
        }))
        .into_response(),
        Telemetry::Malformed => ([(CONTENT_TYPE, "application/json")], "{\"measurements\": [").into_response(),
    }
}
