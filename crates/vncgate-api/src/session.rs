//! Login sessions and the middleware that enforces them.
//!
//! Sessions are random bearer tokens kept in memory and handed to the browser
//! as an `HttpOnly` cookie. They expire after a fixed TTL and are pruned lazily
//! whenever a token is looked up or a new one is issued.

use crate::routes::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use axum::middleware::Next;
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "vncgate_session";

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct Session {
    user: String,
    issued: Instant,
}

/// In-memory token → user map.
pub struct SessionStore {
    ttl: Duration,
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for `user` and return its token.
    pub fn issue(&self, user: &str) -> String {
        self.prune();
        let mut raw = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);
        self.sessions.insert(
            token.clone(),
            Session {
                user: user.to_string(),
                issued: Instant::now(),
            },
        );
        debug!(user, "Session issued");
        token
    }

    /// The user behind `token`, if the session is still live.
    pub fn validate(&self, token: &str) -> Option<String> {
        let expired = match self.sessions.get(token) {
            Some(session) if session.issued.elapsed() < self.ttl => {
                return Some(session.user.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(token);
        }
        None
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.sessions.len();
        let ttl = self.ttl;
        self.sessions.retain(|_, s| s.issued.elapsed() < ttl);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Extract the session token from the request's `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value carrying `token`.
pub fn session_cookie(token: &str, ttl: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that clears the session cookie.
pub fn expired_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Reject requests without a live session when logins are enabled.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response<Body> {
    if state.gateway.credentials().is_none() {
        return next.run(request).await;
    }

    let user = session_token(request.headers()).and_then(|t| state.sessions.validate(&t));
    if user.is_none() {
        debug!(path = %request.uri().path(), "Rejected request without session");
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({"error": "Login required"}).to_string(),
            ))
            .unwrap_or_default();
    }

    next.run(request).await
}
