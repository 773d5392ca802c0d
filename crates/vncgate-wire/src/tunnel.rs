//! Tunnel sessions: full-duplex relay between a client transport and a target.
//!
//! The client side is any framed transport expressed as a `Stream` of inbound
//! payloads plus a `Sink` of outbound payloads; the target side is a raw byte
//! stream. Two pumps run concurrently:
//!
//! - **inbound**: one client message at a time, written verbatim to the target
//! - **outbound**: one target read (up to `chunk_size` bytes) per client message
//!
//! The session ends as soon as either pump stops. The other pump is dropped
//! without draining, then the client sink and the target are each closed
//! exactly once.

use crate::dial::{dial, TargetStream, WireError};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use vncgate_types::target::TargetDescriptor;

/// Target read buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The client transport ended cleanly.
    ClientClosed,
    ClientReadError,
    ClientWriteError,
    /// The target reached EOF.
    TargetClosed,
    TargetReadError,
    TargetWriteError,
}

/// Result of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub exit: PumpExit,
    pub bytes_to_target: u64,
    pub bytes_to_client: u64,
}

/// A dialed target, ready to be attached to a client transport.
pub struct TunnelSession {
    target: TargetDescriptor,
    stream: TargetStream,
    chunk_size: usize,
}

impl TunnelSession {
    /// Dial `target`. Failure means the session never starts.
    pub async fn open(
        target: TargetDescriptor,
        dial_timeout: Duration,
        chunk_size: usize,
    ) -> Result<Self, WireError> {
        let stream = dial(&target, dial_timeout).await?;
        Ok(Self {
            target,
            stream,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Relay until either side stops, then close both.
    pub async fn run<Tx, Rx, E>(self, client_tx: Tx, client_rx: Rx) -> RelayOutcome
    where
        Tx: Sink<Bytes> + Unpin,
        Tx::Error: Display,
        Rx: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let fingerprint = self.target.fingerprint();
        info!(fingerprint = %fingerprint, target = %self.target, "Tunnel session started");
        let outcome = relay(self.stream, client_tx, client_rx, self.chunk_size).await;
        info!(
            fingerprint = %fingerprint,
            exit = ?outcome.exit,
            bytes_to_target = outcome.bytes_to_target,
            bytes_to_client = outcome.bytes_to_client,
            "Tunnel session finished"
        );
        outcome
    }
}

/// Pump bytes both ways until either direction stops.
pub async fn relay<T, Tx, Rx, E>(
    target: T,
    mut client_tx: Tx,
    mut client_rx: Rx,
    chunk_size: usize,
) -> RelayOutcome
where
    T: AsyncRead + AsyncWrite + Unpin,
    Tx: Sink<Bytes> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let (mut target_rd, mut target_wr) = tokio::io::split(target);
    let mut bytes_to_target = 0u64;
    let mut bytes_to_client = 0u64;

    let exit = {
        let inbound = pump_inbound(&mut client_rx, &mut target_wr, &mut bytes_to_target);
        let outbound = pump_outbound(
            &mut target_rd,
            &mut client_tx,
            chunk_size.max(1),
            &mut bytes_to_client,
        );
        tokio::select! {
            exit = inbound => exit,
            exit = outbound => exit,
        }
    };
    debug!(exit = ?exit, "Pump stopped, closing both sides");

    if let Err(e) = client_tx.close().await {
        debug!(error = %e, "Closing client transport failed");
    }
    if let Err(e) = target_wr.shutdown().await {
        debug!(error = %e, "Closing target failed");
    }

    RelayOutcome {
        exit,
        bytes_to_target,
        bytes_to_client,
    }
}

async fn pump_inbound<Rx, E, W>(client_rx: &mut Rx, target: &mut W, counter: &mut u64) -> PumpExit
where
    Rx: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    W: AsyncWrite + Unpin,
{
    loop {
        match client_rx.next().await {
            Some(Ok(payload)) => {
                if let Err(e) = target.write_all(&payload).await {
                    debug!(error = %e, "Target write failed");
                    return PumpExit::TargetWriteError;
                }
                *counter += payload.len() as u64;
            }
            Some(Err(e)) => {
                debug!(error = %e, "Client read failed");
                return PumpExit::ClientReadError;
            }
            None => return PumpExit::ClientClosed,
        }
    }
}

async fn pump_outbound<R, Tx>(
    target: &mut R,
    client_tx: &mut Tx,
    chunk_size: usize,
    counter: &mut u64,
) -> PumpExit
where
    R: AsyncRead + Unpin,
    Tx: Sink<Bytes> + Unpin,
    Tx::Error: Display,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match target.read(&mut buf).await {
            Ok(0) => return PumpExit::TargetClosed,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Target read failed");
                return PumpExit::TargetReadError;
            }
        };
        if let Err(e) = client_tx.send(Bytes::copy_from_slice(&buf[..n])).await {
            debug!(error = %e, "Client write failed");
            return PumpExit::ClientWriteError;
        }
        *counter += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::io;
    use tokio::time::timeout;

    const BOUND: Duration = Duration::from_secs(5);

    type ClientIn = mpsc::Sender<Result<Bytes, io::Error>>;
    type ClientOut = mpsc::Receiver<Bytes>;

    fn spawn_relay(
        chunk_size: usize,
    ) -> (
        tokio::task::JoinHandle<RelayOutcome>,
        tokio::io::DuplexStream,
        ClientIn,
        ClientOut,
    ) {
        let (target, remote) = tokio::io::duplex(64 * 1024);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(64);
        let (in_tx, in_rx) = mpsc::channel::<Result<Bytes, io::Error>>(64);
        let task = tokio::spawn(relay(target, out_tx, in_rx, chunk_size));
        (task, remote, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let (task, mut remote, mut client_in, mut client_out) = spawn_relay(DEFAULT_CHUNK_SIZE);

        client_in.send(Ok(Bytes::from_static(b"hello"))).await.unwrap();
        let mut buf = [0u8; 5];
        timeout(BOUND, remote.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"hello");

        remote.write_all(b"world").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 5 {
            let msg = timeout(BOUND, client_out.next()).await.unwrap().unwrap();
            received.extend_from_slice(&msg);
        }
        assert_eq!(received, b"world");

        drop(client_in);
        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::ClientClosed);
        assert_eq!(outcome.bytes_to_target, 5);
        assert_eq!(outcome.bytes_to_client, 5);
    }

    #[tokio::test]
    async fn test_outbound_messages_carry_only_bytes_read() {
        let (task, mut remote, client_in, mut client_out) = spawn_relay(1024);

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        remote.write_all(&payload).await.unwrap();
        drop(remote);

        let mut received = Vec::new();
        while let Some(msg) = timeout(BOUND, client_out.next()).await.unwrap() {
            assert!(!msg.is_empty());
            assert!(msg.len() <= 1024);
            received.extend_from_slice(&msg);
        }
        assert_eq!(received, payload);

        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::TargetClosed);
        drop(client_in);
    }

    #[tokio::test]
    async fn test_target_close_closes_client() {
        let (task, remote, _client_in, mut client_out) = spawn_relay(DEFAULT_CHUNK_SIZE);

        drop(remote);

        // The client sink is closed: the receiving side sees end-of-stream.
        assert!(timeout(BOUND, client_out.next()).await.unwrap().is_none());
        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::TargetClosed);
    }

    #[tokio::test]
    async fn test_client_close_closes_target() {
        let (task, mut remote, client_in, _client_out) = spawn_relay(DEFAULT_CHUNK_SIZE);

        drop(client_in);

        let mut buf = [0u8; 16];
        let n = timeout(BOUND, remote.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0, "target should see EOF");
        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::ClientClosed);
    }

    #[tokio::test]
    async fn test_client_read_error_ends_session() {
        let (task, mut remote, mut client_in, _client_out) = spawn_relay(DEFAULT_CHUNK_SIZE);

        client_in
            .send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .await
            .unwrap();

        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::ClientReadError);
        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_client_gone_stops_outbound() {
        let (task, mut remote, _client_in, client_out) = spawn_relay(DEFAULT_CHUNK_SIZE);

        drop(client_out);
        remote.write_all(b"frame").await.unwrap();

        let outcome = timeout(BOUND, task).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::ClientWriteError);
    }

    #[tokio::test]
    async fn test_session_open_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TunnelSession::open(
            TargetDescriptor::tcp(addr.to_string()),
            BOUND,
            DEFAULT_CHUNK_SIZE,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_runs_against_tcp_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let echo = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = sock.split();
            tokio::io::copy(&mut rd, &mut wr).await.unwrap();
        });

        let session = TunnelSession::open(TargetDescriptor::tcp(addr.to_string()), BOUND, 1024)
            .await
            .unwrap();
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(8);
        let (mut in_tx, in_rx) = mpsc::channel::<Result<Bytes, io::Error>>(8);
        let run = tokio::spawn(session.run(out_tx, in_rx));

        in_tx.send(Ok(Bytes::from_static(b"ping"))).await.unwrap();
        let reply = timeout(BOUND, out_rx.next()).await.unwrap().unwrap();
        assert_eq!(&reply[..], b"ping");

        drop(in_tx);
        let outcome = timeout(BOUND, run).await.unwrap().unwrap();
        assert_eq!(outcome.exit, PumpExit::ClientClosed);
        timeout(BOUND, echo).await.unwrap().unwrap();
    }
}
