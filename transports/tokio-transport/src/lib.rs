//! Tokio-based TCP transport implementation for ilidar-link
//!
//! This crate provides a concrete implementation of the Transport trait
//! on top of `tokio::net::TcpStream`.
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use linkcore::{ClientError, Endpoint, Transport, TransportEvent, TransportFactory};
use log::{debug, info, trace, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 100;
const FLUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// TCP transport. Writes go through a dedicated writer task so `send` never
/// waits on the network.
pub struct TcpTransport {
    writer_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    read_pump: Mutex<Option<JoinHandle<()>>>,
    write_pump: Mutex<Option<JoinHandle<()>>>,
    // Set by either pump when the link dies, or by `disconnect`.
    closed: Arc<AtomicBool>,
    torn_down: AtomicBool,
    peer: SocketAddr,
}

impl TcpTransport {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::WriteAfterClose);
        }
        let guard = self.writer_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(ClientError::WriteAfterClose)?;
        tx.send(Bytes::copy_from_slice(data))
            .map_err(|_| ClientError::WriteAfterClose)?;
        trace!(target: "Transport/Tcp", "--> Queued {} bytes", data.len());
        Ok(())
    }

    async fn disconnect(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.store(true, Ordering::Release);
        debug!(target: "Transport/Tcp", "Closing connection to {}", self.peer);

        // Dropping the sender lets the writer flush what is queued, then shut
        // down the write half.
        self.writer_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let read_pump = take_handle(&self.read_pump);
        if let Some(pump) = read_pump {
            pump.abort();
            // Wait for the pump to unwind so no event is produced after we return.
            let _ = pump.await;
        }

        let write_pump = take_handle(&self.write_pump);
        if let Some(mut pump) = write_pump {
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut pump).await.is_err() {
                warn!(
                    target: "Transport/Tcp",
                    "Peer at {} stopped reading, dropping unsent data",
                    self.peer
                );
                pump.abort();
                let _ = pump.await;
            }
        }
    }
}

fn take_handle(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Factory for creating Tokio TCP transports
pub struct TcpTransportFactory {
    connect_timeout: Option<Duration>,
    read_chunk_size: usize,
}

impl TcpTransportFactory {
    /// Create a new factory instance
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Bounds each connect attempt; an attempt that runs over fails with
    /// `Timeout`. Unbounded by default.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, ClientError> {
        let dns_failure = |reason: String| ClientError::DnsFailure {
            host: endpoint.host().to_string(),
            reason,
        };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((endpoint.host(), endpoint.port()))
            .await
            .map_err(|e| dns_failure(e.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(dns_failure("no addresses returned".into()));
        }
        Ok(addrs)
    }

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, ClientError> {
        let connect = TcpStream::connect(addr);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => connect.await,
        };
        stream.map_err(ClientError::from_connect_error)
    }

    async fn establish(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(TcpTransport, mpsc::Receiver<TransportEvent>), ClientError> {
        info!(target: "Transport/Tcp", "Dialing {endpoint}");
        let addrs = Self::resolve(endpoint).await?;

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match self.dial(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(target: "Transport/Tcp", "Dial {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(ClientError::NetworkUnreachable),
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(target: "Transport/Tcp", "Failed to set TCP_NODELAY: {e}");
        }
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        // Create event channel
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(write_pump(writer, writer_rx, event_tx.clone(), closed.clone()));
        let reader = tokio::spawn(read_pump(
            reader,
            event_tx,
            closed.clone(),
            self.read_chunk_size,
        ));

        info!(target: "Transport/Tcp", "Connected to {peer}");
        let transport = TcpTransport {
            writer_tx: Mutex::new(Some(writer_tx)),
            read_pump: Mutex::new(Some(reader)),
            write_pump: Mutex::new(Some(writer)),
            closed,
            torn_down: AtomicBool::new(false),
            peer,
        };
        Ok((transport, event_rx))
    }
}

impl Default for TcpTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for TcpTransportFactory {
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), ClientError> {
        let (transport, events) = self.establish(endpoint).await?;
        Ok((Arc::new(transport), events))
    }
}

async fn read_pump(
    mut reader: OwnedReadHalf,
    event_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
    chunk_size: usize,
) {
    let reason = loop {
        let mut buf = BytesMut::with_capacity(chunk_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                trace!(target: "Transport/Tcp", "Stream ended");
                break None;
            }
            Ok(n) => {
                debug!(target: "Transport/Tcp", "<-- Received {n} bytes");
                if event_tx
                    .send(TransportEvent::DataReceived(buf.freeze()))
                    .await
                    .is_err()
                {
                    warn!(target: "Transport/Tcp", "Event receiver dropped, closing read pump");
                    return;
                }
            }
            Err(e) => {
                warn!(target: "Transport/Tcp", "Error reading from socket: {e}");
                break Some(ClientError::Io(e));
            }
        }
    };

    if !closed.swap(true, Ordering::AcqRel) {
        let _ = event_tx.send(TransportEvent::Disconnected(reason)).await;
    }
}

async fn write_pump(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    event_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            warn!(target: "Transport/Tcp", "Error writing to socket: {e}");
            if !closed.swap(true, Ordering::AcqRel) {
                let _ = event_tx
                    .send(TransportEvent::Disconnected(Some(ClientError::Io(e))))
                    .await;
            }
            return;
        }
        trace!(target: "Transport/Tcp", "--> Wrote {} bytes", data.len());
    }
    if let Err(e) = writer.shutdown().await {
        debug!(target: "Transport/Tcp", "Shutdown of write half failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port as u32).unwrap())
    }

    #[tokio::test]
    async fn test_writes_arrive_in_call_order() {
        let (listener, endpoint) = listener().await;
        let factory = TcpTransportFactory::new();
        let (transport, _events) = factory.create_transport(&endpoint).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        for chunk in [&b"abc"[..], b"", b"def", b"g"] {
            transport.send(chunk).await.unwrap();
        }
        transport.disconnect().await;

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"abcdefg");
    }

    #[tokio::test]
    async fn test_peer_data_and_close_are_reported() {
        let (listener, endpoint) = listener().await;
        let factory = TcpTransportFactory::new();
        let (_transport, mut events) = factory.create_transport(&endpoint).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        peer.write_all(b"PONG\n").await.unwrap();
        let mut received = Vec::new();
        loop {
            match events.recv().await {
                Some(TransportEvent::DataReceived(data)) => {
                    received.extend_from_slice(&data);
                    if received.len() >= 5 {
                        break;
                    }
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(received, b"PONG\n");

        drop(peer);
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Disconnected(None))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_writes() {
        let (listener, endpoint) = listener().await;
        let factory = TcpTransportFactory::new();
        let (transport, mut events) = factory.create_transport(&endpoint).await.unwrap();
        let _peer = listener.accept().await.unwrap();

        transport.disconnect().await;
        transport.disconnect().await;

        assert!(matches!(
            transport.send(b"late").await,
            Err(ClientError::WriteAfterClose)
        ));
        // The read pump is gone and never reported a disconnect.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_releases_socket_when_peer_stops_reading() {
        const PAYLOAD: usize = 64 * 1024 * 1024;

        let (listener, endpoint) = listener().await;
        let factory = TcpTransportFactory::new();
        let (transport, _events) = factory.create_transport(&endpoint).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        transport.send(&vec![0x5a; PAYLOAD]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), transport.disconnect())
            .await
            .expect("close must not wait on a stalled peer");
        drop(transport);

        // The socket is gone, so the peer sees end of stream long before the
        // whole payload could have been written.
        let mut received = 0usize;
        let mut buf = vec![0u8; 64 * 1024];
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match peer.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received += n,
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "peer never saw the connection close");
        assert!(received < PAYLOAD, "unsent data was flushed after close");
    }

    #[tokio::test]
    async fn test_close_after_write_failure_still_stops_reader() {
        let (listener, endpoint) = listener().await;
        let factory = TcpTransportFactory::new();
        let (transport, mut events) = factory.establish(&endpoint).await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();

        // Simulates a pump that already flagged the link as dead.
        transport.closed.store(true, Ordering::Release);
        transport.disconnect().await;

        assert!(transport.read_pump.lock().unwrap().is_none());
        assert!(transport.write_pump.lock().unwrap().is_none());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let endpoint = Endpoint::new("10.255.255.1", 9).unwrap();
        let result = TcpTransportFactory::new()
            .with_connect_timeout(Duration::from_millis(1))
            .create_transport(&endpoint)
            .await;
        // Hosts without a route to that block fail before the timer fires.
        assert!(
            matches!(
                result,
                Err(ClientError::Timeout) | Err(ClientError::NetworkUnreachable)
            ),
            "unexpected result: {:?}",
            result.err()
        );
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (listener, endpoint) = listener().await;
        drop(listener);

        let result = TcpTransportFactory::new().create_transport(&endpoint).await;
        assert!(matches!(result, Err(ClientError::ConnectionRefused)));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let endpoint = Endpoint::new("no-such-host.invalid", 8888).unwrap();
        let result = TcpTransportFactory::new().create_transport(&endpoint).await;
        assert!(matches!(result, Err(ClientError::DnsFailure { .. })));
    }
}
