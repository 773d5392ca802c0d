//! Gateway HTTP server: router assembly, TLS setup and lifecycle.

use crate::rate_limiter::{create_rate_limiter, gcra_rate_limit};
use crate::routes::{self, AppState};
use crate::tls::{load_server_config, TlsListener};
use axum::serve::ListenerExt;
use crate::{assets, events, session, ws};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vncgate_kernel::error::KernelResult;
use vncgate_kernel::tls::{ensure_certificate, CertAction};
use vncgate_kernel::Gateway;
use vncgate_types::error::GatewayError;

/// How long open tunnels and event streams get to finish after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the full router for `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/vnc/{fingerprint}", get(ws::vnc_tunnel))
        .route("/api/list", get(routes::list_targets))
        .route("/api/list/subscribe", get(events::subscribe))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    let public = Router::new()
        .route("/", get(routes::index))
        .route("/static/{*path}", get(assets::serve_static))
        .route("/api/health", get(routes::health))
        .route("/api/login", post(routes::login))
        .route("/api/logout", post(routes::logout));

    let mut app = public
        .merge(protected)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    let per_minute = state.gateway.config().api.rate_limit_per_minute;
    match create_rate_limiter(per_minute) {
        Some(limiter) => {
            app = app.layer(middleware::from_fn_with_state(limiter, gcra_rate_limit));
        }
        None => warn!("Rate limiting disabled"),
    }
    app
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn run_gateway<F>(gateway: Arc<Gateway>, shutdown: F) -> KernelResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = gateway.config().listen_addr.clone();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        GatewayError::Config(format!("cannot listen on {addr}: {e}"))
    })?;
    serve(listener, gateway, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// Starts discovery first and stops it once the server has drained. Open
/// tunnels and event streams get [`SHUTDOWN_GRACE`] to finish.
pub async fn serve<F>(listener: TcpListener, gateway: Arc<Gateway>, shutdown: F) -> KernelResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::new(Arc::clone(&gateway))?;
    let app = build_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

    gateway.start_discovery()?;

    let stopping = Arc::clone(&state);
    let signal = async move {
        shutdown.await;
        info!("Shutdown requested");
        stopping.shutdown.send_replace(true);
    };
    let mut draining = state.shutdown.subscribe();
    let grace = async move {
        let _ = draining.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    let config = gateway.config();
    let local_addr = listener.local_addr().map_err(GatewayError::Io)?;
    let result = if config.tls.disable {
        warn!(addr = %local_addr, "TLS DISABLED, serving plain HTTP");
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .into_future();
        tokio::select! {
            r = server => r,
            _ = grace => {
                warn!("Connections still open after grace period");
                Ok(())
            }
        }
    } else {
        let (cert_path, key_path) = (config.cert_path(), config.key_path());
        match ensure_certificate(&config.hostname, &cert_path, &key_path)? {
            CertAction::Existing => {}
            action => info!(?action, cert = %cert_path.display(), "Certificate prepared"),
        }
        let tls = load_server_config(&cert_path, &key_path)?;
        let listener = TlsListener::new(listener, tls).map_err(GatewayError::Io)?;
        info!(addr = %local_addr, hostname = %config.hostname, "Serving HTTPS");
        let server = axum::serve(listener.tap_io(|_| {}), app)
            .with_graceful_shutdown(signal)
            .into_future();
        tokio::select! {
            r = server => r,
            _ = grace => {
                warn!("Connections still open after grace period");
                Ok(())
            }
        }
    };

    gateway.shutdown().await;
    result.map_err(|e| GatewayError::Io(e).into())
}
