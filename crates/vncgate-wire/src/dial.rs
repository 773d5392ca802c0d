//! Dialing targets.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;
use vncgate_types::error::GatewayError;
use vncgate_types::target::{TargetDescriptor, Transport};

/// Errors from the tunnel layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Dial {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Dial {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
    #[error("Transport '{0}' is not supported on this platform")]
    UnsupportedTransport(Transport),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for GatewayError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Dial { address, source } => GatewayError::TargetUnreachable {
                address,
                reason: source.to_string(),
            },
            WireError::Timeout { address, timeout } => GatewayError::TargetUnreachable {
                address,
                reason: format!("timed out after {timeout:?}"),
            },
            WireError::UnsupportedTransport(t) => {
                GatewayError::InvalidTarget(format!("unsupported transport '{t}'"))
            }
            WireError::Io(e) => GatewayError::Io(e),
        }
    }
}

/// Any byte stream a target connection can be.
pub trait TargetIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TargetIo for T {}

/// A connected target.
pub type TargetStream = Box<dyn TargetIo>;

/// Connect to `target`, giving up after `timeout`.
pub async fn dial(target: &TargetDescriptor, timeout: Duration) -> Result<TargetStream, WireError> {
    let address = target.address.clone();
    let dial_err = |source| WireError::Dial {
        address: address.clone(),
        source,
    };

    let connect = async {
        match target.transport {
            Transport::Tcp => {
                let stream = TcpStream::connect(&target.address).await.map_err(dial_err)?;
                stream.set_nodelay(true)?;
                Ok::<TargetStream, WireError>(Box::new(stream))
            }
            #[cfg(unix)]
            Transport::Unix => {
                let stream = tokio::net::UnixStream::connect(&target.address)
                    .await
                    .map_err(dial_err)?;
                Ok::<TargetStream, WireError>(Box::new(stream))
            }
            #[cfg(not(unix))]
            Transport::Unix => Err(WireError::UnsupportedTransport(Transport::Unix)),
        }
    };

    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| WireError::Timeout {
            address: target.address.clone(),
            timeout,
        })??;
    debug!(target = %target, "Dialed target");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_dial_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"RFB 003.008\n").await.unwrap();
        });

        let mut stream = dial(&TargetDescriptor::tcp(addr.to_string()), TIMEOUT)
            .await
            .unwrap();
        let mut banner = [0u8; 12];
        stream.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"RFB 003.008\n");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(&TargetDescriptor::tcp(addr.to_string()), TIMEOUT)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WireError::Dial { .. }));
        assert!(matches!(
            GatewayError::from(err),
            GatewayError::TargetUnreachable { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dial_unix() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("display0.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        dial(&TargetDescriptor::unix(path.to_string_lossy()), TIMEOUT)
            .await
            .unwrap();
        accept.await.unwrap().unwrap();

        let missing = dir.path().join("missing.sock");
        assert!(dial(&TargetDescriptor::unix(missing.to_string_lossy()), TIMEOUT)
            .await
            .is_err());
    }
}
