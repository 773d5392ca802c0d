//! Per-client request budget, enforced with GCRA.
//!
//! Every request is classified into a [`Route`] with a fixed token cost
//! (health=1, list=2, tunnel=10, login=60). Each client IP may spend
//! `api.rate_limit_per_minute` tokens per minute.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::clock::{Clock, DefaultClock};
use governor::{state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

pub type KeyedRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// What a request is asking for, as far as its cost is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Health,
    Dashboard,
    List,
    Subscribe,
    Tunnel,
    Login,
    Logout,
    Other,
}

impl Route {
    pub fn classify(method: &str, path: &str) -> Self {
        match (method, path) {
            (_, "/api/health") => Route::Health,
            ("GET", "/") => Route::Dashboard,
            ("GET", p) if p.starts_with("/static/") => Route::Dashboard,
            ("GET", "/api/list") => Route::List,
            ("GET", "/api/list/subscribe") => Route::Subscribe,
            ("GET", p) if p.starts_with("/vnc/") => Route::Tunnel,
            ("POST", "/api/login") => Route::Login,
            ("POST", "/api/logout") => Route::Logout,
            _ => Route::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::Dashboard => "dashboard",
            Route::List => "list",
            Route::Subscribe => "subscribe",
            Route::Tunnel => "tunnel",
            Route::Login => "login",
            Route::Logout => "logout",
            Route::Other => "other",
        }
    }

    pub fn cost(self) -> NonZeroU32 {
        let tokens = match self {
            Route::Health | Route::Dashboard => 1,
            Route::List | Route::Logout => 2,
            Route::Subscribe | Route::Other => 5,
            Route::Tunnel => 10,
            Route::Login => 60,
        };
        NonZeroU32::new(tokens).unwrap_or(NonZeroU32::MIN)
    }
}

/// `per_minute` tokens per client IP; `None` when limiting is disabled (0).
pub fn create_rate_limiter(per_minute: u32) -> Option<Arc<KeyedRateLimiter>> {
    let per_minute = NonZeroU32::new(per_minute)?;
    Some(Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))))
}

/// Charge the request's route cost to its client IP, or answer 429.
///
/// Requests without `ConnectInfo` (in-process tests) are charged to loopback.
pub async fn gcra_rate_limit(
    State(limiter): State<Arc<KeyedRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));
    let route = Route::classify(request.method().as_str(), request.uri().path());
    let cost = route.cost();

    let retry_after = match limiter.check_key_n(&ip, cost) {
        Ok(Ok(())) => return next.run(request).await,
        Ok(Err(not_until)) => not_until
            .wait_time_from(DefaultClock::default().now())
            .as_secs()
            .max(1),
        // The route costs more than a whole minute's budget.
        Err(_) => 60,
    };

    warn!(
        ip = %ip,
        route = route.name(),
        cost = cost.get(),
        retry_after,
        "Request budget exhausted"
    );
    too_many_requests(route, retry_after)
}

fn too_many_requests(route: Route, retry_after: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Rate limit exceeded",
            "route": route.name(),
            "cost": route.cost().get(),
            "retry_after_secs": retry_after,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{middleware, Router};
    use tower::ServiceExt;

    #[test]
    fn test_route_costs() {
        let cost = |m, p| Route::classify(m, p).cost().get();
        assert_eq!(cost("GET", "/api/health"), 1);
        assert_eq!(cost("GET", "/static/dashboard.js"), 1);
        assert_eq!(cost("GET", "/api/list"), 2);
        assert_eq!(cost("GET", "/api/list/subscribe"), 5);
        assert_eq!(cost("GET", "/vnc/00112233"), 10);
        assert_eq!(cost("POST", "/api/login"), 60);
        assert_eq!(cost("DELETE", "/api/list"), 5);
        assert_eq!(Route::classify("GET", "/vnc/00112233"), Route::Tunnel);
        assert_eq!(Route::classify("GET", "/api/login"), Route::Other);
    }

    #[test]
    fn test_zero_disables_limiter() {
        assert!(create_rate_limiter(0).is_none());
        assert!(create_rate_limiter(600).is_some());
    }

    #[test]
    fn test_budget_is_per_ip() {
        let limiter = create_rate_limiter(120).unwrap();
        let ip = IpAddr::from([10, 0, 0, 1]);
        let login = Route::Login.cost();
        assert!(matches!(limiter.check_key_n(&ip, login), Ok(Ok(()))));
        assert!(matches!(limiter.check_key_n(&ip, login), Ok(Ok(()))));
        assert!(!matches!(limiter.check_key_n(&ip, login), Ok(Ok(()))));

        let other = IpAddr::from([10, 0, 0, 2]);
        assert!(matches!(limiter.check_key_n(&other, login), Ok(Ok(()))));
    }

    fn limited_app(per_minute: u32) -> Router {
        let limiter = create_rate_limiter(per_minute).unwrap();
        Router::new()
            .route("/api/login", post(|| async { "ok" }))
            .route("/api/health", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, gcra_rate_limit))
    }

    async fn call(app: &Router, method: &str, path: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_exhausted_budget_names_the_route() {
        let app = limited_app(60);
        assert_eq!(call(&app, "POST", "/api/login").await.status(), StatusCode::OK);

        let denied = call(&app, "POST", "/api/login").await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = denied.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry));

        let body = axum::body::to_bytes(denied.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["route"], "login");
        assert_eq!(json["cost"], 60);
    }

    #[tokio::test]
    async fn test_route_over_whole_budget_is_refused() {
        let app = limited_app(10);
        let denied = call(&app, "POST", "/api/login").await;
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers()[header::RETRY_AFTER], "60");
        assert_eq!(call(&app, "GET", "/api/health").await.status(), StatusCode::OK);
    }
}
