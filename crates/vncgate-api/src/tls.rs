//! TLS termination for the HTTP server.
//!
//! [`TlsListener`] wraps a TCP listener: a background task accepts sockets and
//! runs each handshake in its own task, so one slow client cannot stall the
//! accept loop. Completed streams are handed to axum through a channel.

use axum::serve::Listener;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};
use vncgate_types::error::{GatewayError, GatewayResult};

/// Handshakes that take longer than this are abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const PENDING_CONNECTIONS: usize = 64;

fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build a rustls server config from PEM files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> GatewayResult<rustls::ServerConfig> {
    ensure_crypto_provider();

    let tls_err = |path: &Path, e: &dyn std::fmt::Display| {
        GatewayError::Tls(format!("{}: {e}", path.display()))
    };

    let mut cert_reader = BufReader::new(std::fs::File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_err(cert_path, &e))?;
    if certs.is_empty() {
        return Err(tls_err(cert_path, &"no certificates found"));
    }

    let mut key_reader = BufReader::new(std::fs::File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| tls_err(key_path, &e))?
        .ok_or_else(|| tls_err(key_path, &"no private key found"))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;
    // WebSocket upgrades need HTTP/1.1.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// A listener yielding TLS streams that completed their handshake.
pub struct TlsListener {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub fn new(listener: TcpListener, config: rustls::ServerConfig) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let (tx, incoming) = mpsc::channel(PENDING_CONNECTIONS);
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, tx));
        Ok(Self {
            local_addr,
            incoming,
            accept_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        if tx.is_closed() {
            return;
        }

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => {
                    let _ = tx.send((stream, peer)).await;
                }
                Ok(Err(e)) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                Err(_) => debug!(peer = %peer, "TLS handshake timed out"),
            }
        });
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(conn) => conn,
            // The accept task only stops when aborted, which happens on drop.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vncgate_kernel::tls::ensure_certificate;

    #[test]
    fn test_load_generated_certificate() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("gw.crt");
        let key = dir.path().join("gw.key");
        ensure_certificate("localhost", &cert, &key).unwrap();

        let config = load_server_config(&cert, &key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("gw.crt");
        let key = dir.path().join("gw.key");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();
        assert!(matches!(
            load_server_config(&cert, &key),
            Err(GatewayError::Tls(_))
        ));
        assert!(load_server_config(&dir.path().join("absent"), &key).is_err());
    }
}
