//! Mock REST API
//!
//! A handful of routes with fixed behaviors (success, empty body, client
//! error, server errors, rate limits) and a log of every call received.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fixtures::TOKEN;

/// Failures `/unstable` returns before it succeeds
pub const UNSTABLE_FAILURES: usize = 2;

/// `retry_after` sent with every 429, seconds
pub const RETRY_AFTER_SECS: f64 = 0.3;

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub at: Instant,
}

struct RestState {
    gateway_url: String,
    shards: u32,
    calls: Mutex<Vec<RecordedCall>>,
    hits: Mutex<HashMap<String, usize>>,
}

type Shared = Arc<RestState>;

impl RestState {
    /// Count a hit on `path`, returning how many came before it
    fn hit(&self, path: &str) -> usize {
        let mut hits = self.hits.lock();
        let count = hits.entry(path.to_string()).or_default();
        *count += 1;
        *count - 1
    }
}

/// Local REST server listening on an ephemeral port
pub struct MockRest {
    pub addr: SocketAddr,
    state: Shared,
    _handle: JoinHandle<()>,
}

impl MockRest {
    /// Start a server whose bootstrap call points at `gateway_url`
    pub async fn start(gateway_url: impl Into<String>, shards: u32) -> Result<Self> {
        let state = Arc::new(RestState {
            gateway_url: gateway_url.into(),
            shards,
            calls: Mutex::new(Vec::new()),
            hits: Mutex::new(HashMap::new()),
        });

        let app = Router::new()
            .route("/gateway", get(gateway))
            .route("/gateway/bot", get(gateway_bot))
            .route("/users/@me", get(current_user))
            .route("/channels/:channel_id/messages", post(create_message))
            .route(
                "/channels/:channel_id/messages/:message_id",
                delete(delete_message),
            )
            .route("/guilds/:guild_id", get(unknown_guild))
            .route("/unstable", get(unstable))
            .route("/down", get(down))
            .route("/limited", get(limited))
            .route("/busy", get(busy))
            .layer(middleware::from_fn_with_state(state.clone(), record))
            .with_state(state.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// API base URL for [`RestConfig`](tether_common::RestConfig)
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }

    /// Calls received on `path`, in arrival order
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }
}

async fn record(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let call = {
        let headers = request.headers();
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        RecordedCall {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            authorization: text(header::AUTHORIZATION),
            user_agent: text(header::USER_AGENT),
            at: Instant::now(),
        }
    };
    state.calls.lock().push(call);

    next.run(request).await
}

fn is_authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bot {TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "401: Unauthorized", "code": 0 })),
    )
        .into_response()
}

fn rate_limited(global: bool) -> Response {
    let body = Json(json!({
        "message": "You are being rate limited.",
        "retry_after": RETRY_AFTER_SECS,
        "global": global,
    }));
    if global {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-ratelimit-global", "true")],
            body,
        )
            .into_response()
    } else {
        (StatusCode::TOO_MANY_REQUESTS, body).into_response()
    }
}

async fn gateway(State(state): State<Shared>) -> Json<Value> {
    Json(json!({ "url": state.gateway_url }))
}

async fn gateway_bot(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !is_authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "url": state.gateway_url,
        "shards": state.shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1,
        },
    }))
    .into_response()
}

async fn current_user(headers: HeaderMap) -> Response {
    if !is_authorized(&headers) {
        return unauthorized();
    }
    (
        [
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-reset-after", "1.0"),
        ],
        Json(json!({ "id": "80351110224678912", "username": "tether", "bot": true })),
    )
        .into_response()
}

async fn create_message(
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !is_authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "id": "1100",
        "channel_id": channel_id,
        "content": body["content"],
    }))
    .into_response()
}

async fn delete_message(Path((_channel_id, _message_id)): Path<(String, String)>) -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn unknown_guild(Path(_guild_id): Path<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Unknown Guild", "code": 10004 })),
    )
        .into_response()
}

async fn unstable(State(state): State<Shared>) -> Response {
    if state.hit("/unstable") < UNSTABLE_FAILURES {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn down() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn limited(State(state): State<Shared>) -> Response {
    if state.hit("/limited") == 0 {
        return rate_limited(false);
    }
    Json(json!({ "ok": true })).into_response()
}

async fn busy(State(state): State<Shared>) -> Response {
    if state.hit("/busy") == 0 {
        return rate_limited(true);
    }
    Json(json!({ "ok": true })).into_response()
}
