use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::events::Event;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let timestamp = Utc::now().to_rfc3339();
    match state.ledger.record_count().await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "blockchain": {
                    "connected": true,
                    "contractAddress": state.ledger.contract_address(),
                    "recordCount": count,
                },
                "timestamp": timestamp,
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "blockchain": {
                        "connected": false,
                        "error": format!("{e:#}"),
                    },
                    "timestamp": timestamp,
                })),
            )
        }
    }
}

/// Hex HMAC-SHA256 of `body`, optionally prefixed with `sha256=`.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign(secret: &[u8], body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("invalid webhook key: {e}"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    if let Some(secret) = &state.settings.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing webhook signature".into()))?;
        if !verify_signature(secret.expose_secret().as_bytes(), &body, signature) {
            return Err(ApiError::Unauthorized("Invalid webhook signature".into()));
        }
    }
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
    info!("Webhook received: {}", payload);
    Ok(Json(json!({ "success": true })))
}

pub async fn ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    // Subscribe before the handshake completes so nothing published after
    // the upgrade is missed.
    let rx = state.events.subscribe();
    upgrade.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: broadcast::Receiver<Event>) {
    info!("WebSocket client connected");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("Failed to encode {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => debug!("Ignoring client frame: {:?}", other),
            },
        }
    }
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"hash":"0xabc"}"#;
        let sig = sign(b"topsecret", body).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify_signature(b"topsecret", body, &sig));
        assert!(verify_signature(b"topsecret", body, &format!("sha256={sig}")));
        assert!(!verify_signature(b"other", body, &sig));
        assert!(!verify_signature(b"topsecret", b"{}", &sig));
        assert!(!verify_signature(b"topsecret", body, "not-hex"));
    }
}
