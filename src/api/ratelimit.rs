use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Fixed-window request counter per client key.
#[derive(Clone)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    /// Key on `X-Forwarded-For` instead of the peer address.
    trust_proxy: bool,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            trust_proxy: false,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Only enable behind a proxy that overwrites `X-Forwarded-For`;
    /// otherwise clients pick their own key.
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    pub async fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now()).await
    }

    async fn allow_at(&self, key: &str, now: Instant) -> bool {
        if self.max == 0 {
            return true;
        }
        let mut windows = self.windows.lock().await;
        // Drop expired windows so the map stays bounded by active clients.
        windows.retain(|_, w| now.duration_since(w.started) < self.window);

        let w = windows.entry(key.to_string()).or_insert(Window { started: now, hits: 0 });
        if w.hits >= self.max {
            return false;
        }
        w.hits += 1;
        true
    }
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy is
/// trusted.
fn client_key(req: &Request, trust_proxy: bool) -> String {
    if let Some(forwarded) = trust_proxy
        .then(|| req.headers())
        .and_then(|h| h.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

pub async fn limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = client_key(&req, state.limiter.trust_proxy);
    if !state.limiter.allow(&key).await {
        return ApiError::TooManyRequests.into_response();
    }
    next.run(req).await
}
