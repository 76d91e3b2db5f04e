use bytes::Bytes;
use linkcore::{ClientError, Endpoint, Transport, TransportEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

// --- Messages for ConnectionManager ---
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Start a connect attempt for lifecycle `epoch`.
    Open { epoch: u64, endpoint: Endpoint },
    /// Data to queue on the live transport, in call order.
    Write(Bytes),
    /// Tear down whatever is live or pending.
    Close,
}

pub(crate) type OpenResult =
    Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), ClientError>;

/// Completion report of a spawned connect attempt.
pub(crate) struct OpenOutcome {
    pub epoch: u64,
    pub result: OpenResult,
}
