//! Bundled dashboard assets, or a pass-through to a development web server.

use crate::routes::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Response, StatusCode, Uri};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use vncgate_types::error::{GatewayError, GatewayResult};

static ASSETS: &[(&str, &[u8])] = &[
    ("dashboard.html", include_bytes!("../static/dashboard.html")),
    ("dashboard.js", include_bytes!("../static/dashboard.js")),
    ("login.html", include_bytes!("../static/login.html")),
];

/// Body of the bundled asset at `path` (relative to `/static/`).
pub fn lookup(path: &str) -> Option<&'static [u8]> {
    let path = path.trim_start_matches('/');
    ASSETS
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, body)| *body)
}

/// Content type guessed from the file extension.
pub fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Quoted SHA-256 entity tag of `body`.
pub fn etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

fn etag_matches(if_none_match: &str, tag: &str) -> bool {
    if_none_match.trim() == "*"
        || if_none_match
            .split(',')
            .map(|t| t.trim().trim_start_matches("W/"))
            .any(|t| t == tag)
}

/// Serve a bundled asset, answering conditional requests with 304.
pub fn asset_response(path: &str, headers: &HeaderMap) -> Response<Body> {
    let Some(body) = lookup(path) else {
        warn!(path, "Asset not found");
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not found"))
            .unwrap_or_default();
    };

    let tag = etag(body);
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| etag_matches(v, &tag));
    if not_modified {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, tag)
            .body(Body::empty())
            .unwrap_or_default();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(path))
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::ETAG, tag)
        .body(Body::from(body))
        .unwrap_or_default()
}

/// Forwards `/static/*` to a development origin.
pub struct DebugProxy {
    client: reqwest::Client,
    origin: url::Url,
}

impl DebugProxy {
    pub fn new(origin: &str) -> GatewayResult<Self> {
        let origin = url::Url::parse(origin)
            .map_err(|e| GatewayError::Config(format!("debug_webapp_proxy '{origin}': {e}")))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Config(format!("debug proxy client: {e}")))?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &url::Url {
        &self.origin
    }

    /// Upstream URL for a request path (and query).
    pub fn upstream_url(&self, uri: &Uri) -> GatewayResult<url::Url> {
        let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        self.origin
            .join(path_and_query)
            .map_err(|e| GatewayError::Config(format!("debug proxy path '{path_and_query}': {e}")))
    }

    /// Relay a GET for `uri` to the origin and return its response.
    pub async fn forward(&self, uri: &Uri, headers: &HeaderMap) -> Response<Body> {
        let upstream = match self.upstream_url(uri) {
            Ok(u) => u,
            Err(e) => return bad_gateway(&e.to_string()),
        };
        debug!(upstream = %upstream, "Proxying asset request");

        let mut request = self.client.get(upstream.clone());
        for name in [header::IF_NONE_MATCH, header::ACCEPT, header::ACCEPT_ENCODING] {
            if let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) {
                request = request.header(name.as_str(), value);
            }
        }

        let upstream_response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(upstream = %upstream, error = %e, "Debug proxy request failed");
                return bad_gateway("Debug proxy unreachable");
            }
        };

        let status = upstream_response.status().as_u16();
        let mut builder = Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
        for name in [
            header::CONTENT_TYPE,
            header::ETAG,
            header::CACHE_CONTROL,
            header::CONTENT_ENCODING,
        ] {
            if let Some(value) = upstream_response
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
            {
                builder = builder.header(name, value);
            }
        }

        match upstream_response.bytes().await {
            Ok(body) => builder.body(Body::from(body)).unwrap_or_default(),
            Err(e) => {
                warn!(upstream = %upstream, error = %e, "Debug proxy body failed");
                bad_gateway("Debug proxy body failed")
            }
        }
    }
}

fn bad_gateway(message: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

/// `GET /static/{*path}`
pub async fn serve_static(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response<Body> {
    match &state.debug_proxy {
        Some(proxy) => proxy.forward(&uri, &headers).await,
        None => asset_response(&path, &headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bundled_assets_present() {
        for name in ["dashboard.html", "dashboard.js", "login.html"] {
            assert!(lookup(name).is_some_and(|b| !b.is_empty()), "{name}");
        }
        assert!(lookup("/dashboard.html").is_some());
        assert!(lookup("../Cargo.toml").is_none());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("dashboard.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("app.JS"), "text/javascript; charset=utf-8");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_response_headers_and_conditional_get() {
        let resp = asset_response("dashboard.js", &HeaderMap::new());
        assert_eq!(resp.status(), StatusCode::OK);
        let body = lookup("dashboard.js").unwrap();
        assert_eq!(
            resp.headers()[header::CONTENT_LENGTH],
            body.len().to_string().as_str()
        );
        let tag = resp.headers()[header::ETAG].to_str().unwrap().to_string();
        assert_eq!(tag, etag(body));

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&tag).unwrap());
        let resp = asset_response("dashboard.js", &headers);
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"stale\""));
        assert_eq!(asset_response("dashboard.js", &headers).status(), StatusCode::OK);

        assert_eq!(
            asset_response("missing.css", &HeaderMap::new()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_weak_and_list_etags() {
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\", \"abc\"", "\"abc\""));
        assert!(etag_matches("*", "\"abc\""));
        assert!(!etag_matches("\"x\"", "\"abc\""));
    }

    #[test]
    fn test_proxy_upstream_url() {
        let proxy = DebugProxy::new("http://127.0.0.1:8000").unwrap();
        let uri: Uri = "/static/rfb.js?v=2".parse().unwrap();
        assert_eq!(
            proxy.upstream_url(&uri).unwrap().as_str(),
            "http://127.0.0.1:8000/static/rfb.js?v=2"
        );
        assert!(DebugProxy::new("not a url").is_err());
    }
}
