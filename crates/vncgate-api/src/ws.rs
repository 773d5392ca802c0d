//! WebSocket tunnel endpoint (`GET /vnc/{fingerprint}`).
//!
//! Flow: resolve fingerprint → dial target → upgrade → relay until either side
//! stops. An unknown fingerprint is a 404 and an unreachable target a 502;
//! neither starts a session.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use vncgate_types::target::Fingerprint;
use vncgate_wire::TunnelSession;

/// First sub-protocol the client offered, if any.
pub fn first_offered_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string)
}

/// Inbound payloads from the socket. Control frames are skipped and a close
/// frame ends the stream.
fn inbound_payloads<S>(socket_rx: S) -> impl Stream<Item = Result<Bytes, axum::Error>> + Unpin
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    socket_rx
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        })
}

/// Outbound sink that wraps every chunk in a binary frame.
fn outbound_frames<S>(socket_tx: S) -> impl Sink<Bytes, Error = axum::Error> + Unpin
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    socket_tx.with(|chunk: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(chunk))))
}

async fn run_session(session: TunnelSession, socket: WebSocket) {
    let (socket_tx, socket_rx) = socket.split();
    session
        .run(outbound_frames(socket_tx), inbound_payloads(socket_rx))
        .await;
}

/// `GET /vnc/{fingerprint}`
pub async fn vnc_tunnel(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
) -> Response {
    let target = fingerprint
        .parse::<Fingerprint>()
        .ok()
        .and_then(|fp| state.gateway.registry().get(&fp));
    let Some(target) = target else {
        debug!(fingerprint = %fingerprint, "Tunnel requested for unknown target");
        return (StatusCode::NOT_FOUND, "Target not found").into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let tunnel = &state.gateway.config().tunnel;
    let session =
        match TunnelSession::open(target.clone(), tunnel.dial_timeout(), tunnel.chunk_size).await {
            Ok(s) => s,
            Err(e) => {
                warn!(fingerprint = %fingerprint, target = %target, error = %e, "Dial failed");
                return (StatusCode::BAD_GATEWAY, "Target unreachable").into_response();
            }
        };

    let ws = match first_offered_protocol(&headers) {
        Some(protocol) => {
            debug!(protocol = %protocol, "Selected sub-protocol");
            ws.protocols([protocol])
        }
        None => ws,
    };

    ws.on_failed_upgrade(|e| debug!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| run_session(session, socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use futures::channel::mpsc;

    #[test]
    fn test_first_offered_protocol() {
        let mut headers = HeaderMap::new();
        assert!(first_offered_protocol(&headers).is_none());

        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("binary, base64"),
        );
        assert_eq!(first_offered_protocol(&headers).as_deref(), Some("binary"));

        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(" , rfb"));
        assert_eq!(first_offered_protocol(&headers).as_deref(), Some("rfb"));
    }

    #[tokio::test]
    async fn test_inbound_skips_control_and_stops_at_close() {
        let frames: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Binary(Bytes::from_static(b"\x01\x02"))),
            Ok(Message::Ping(Bytes::from_static(b"p"))),
            Ok(Message::Text("hi".into())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(Bytes::from_static(b"late"))),
        ];
        let payloads: Vec<Bytes> = inbound_payloads(futures::stream::iter(frames))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            payloads,
            vec![Bytes::from_static(b"\x01\x02"), Bytes::from_static(b"hi")]
        );
    }

    #[tokio::test]
    async fn test_outbound_wraps_binary() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let mut sink = outbound_frames(tx.sink_map_err(axum::Error::new));
        sink.send(Bytes::from_static(b"RFB")).await.unwrap();
        match rx.next().await {
            Some(Message::Binary(data)) => assert_eq!(&data[..], b"RFB"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
