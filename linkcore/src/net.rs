use crate::error::ClientError;
use crate::state::Endpoint;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
///
/// Events from one transport arrive on a single channel, one at a time and in
/// arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw data has been received from the peer.
    DataReceived(Bytes),
    /// The connection was lost. `None` means the peer closed it cleanly.
    Disconnected(Option<ClientError>),
}

/// Represents an active connection to one endpoint.
/// The transport is a dumb pipe for bytes with no knowledge of framing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queues raw data for transmission. Data from successive calls goes out
    /// in call order. Fails with `WriteAfterClose` once the transport is closed.
    async fn send(&self, data: &[u8]) -> Result<(), ClientError>;

    /// Closes the connection. Safe to call more than once; no further events
    /// are produced once it returns.
    async fn disconnect(&self);
}

/// A factory responsible for opening new transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a transport to `endpoint` and returns it, along with its stream
    /// of events. The result is the one completion report of the attempt.
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), ClientError>;
}
