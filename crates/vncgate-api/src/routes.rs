//! Route handlers for the gateway API.

use crate::assets::DebugProxy;
use crate::events::EventDistributor;
use crate::session::{expired_cookie, session_cookie, session_token, SessionStore};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use vncgate_kernel::Gateway;
use vncgate_types::error::GatewayResult;
use vncgate_types::target::PublicTarget;

/// Shared state for all handlers.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub sessions: SessionStore,
    pub events: EventDistributor,
    pub debug_proxy: Option<DebugProxy>,
    /// Flipped to `true` once the server starts shutting down.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> GatewayResult<Arc<Self>> {
        let config = gateway.config();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let events = EventDistributor::new(
            Arc::clone(gateway.registry()),
            config.api.liveness_interval(),
            shutdown_rx,
        );
        let debug_proxy = match &config.debug_webapp_proxy {
            Some(origin) => {
                info!(origin = %origin, "Proxying static assets");
                Some(DebugProxy::new(origin)?)
            }
            None => None,
        };
        let sessions = SessionStore::new(Duration::from_secs(config.auth.session_ttl_secs));

        Ok(Arc::new(Self {
            gateway,
            sessions,
            events,
            debug_proxy,
            shutdown,
        }))
    }
}

/// `GET /`: send browsers to the dashboard.
pub async fn index() -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(header::LOCATION, "/static/dashboard.html")],
    )
}

/// `GET /api/list`: current targets keyed by fingerprint. Passwords are never included.
pub async fn list_targets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let targets: BTreeMap<String, PublicTarget> = state
        .gateway
        .registry()
        .list()
        .into_iter()
        .map(|(fp, target)| (fp.to_hex(), target.public()))
        .collect();
    Json(targets)
}

/// `GET /api/health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.gateway.registry();
    Json(serde_json::json!({
        "status": "ok",
        "targets": registry.len(),
        "dropped_events": registry.dropped_events(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /api/login`: verify credentials and issue a session cookie.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let Some(store) = state.gateway.credentials().cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Authentication is not enabled"})),
        )
            .into_response();
    };

    let username = req.username.clone();
    let verified = tokio::task::spawn_blocking(move || store.verify(&req.username, &req.password))
        .await
        .unwrap_or(false);
    if !verified {
        warn!(username = %username, "Login failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid username or password"})),
        )
            .into_response();
    }

    let token = state.sessions.issue(&username);
    let secure = !state.gateway.config().tls.disable;
    info!(username = %username, "Login succeeded");
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            session_cookie(&token, state.sessions.ttl(), secure),
        )],
        Json(serde_json::json!({"status": "ok", "username": username})),
    )
        .into_response()
}

/// `POST /api/logout`
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = session_token(&headers) {
        state.sessions.revoke(&token);
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, expired_cookie())],
        Json(serde_json::json!({"status": "ok"})),
    )
}
