use crate::actors::connection_manager::ConnectionManager;
use crate::actors::messages::ConnectionCommand;
use crate::callbacks::Handlers;
use crate::config::ClientConfig;
use bytes::Bytes;
use linkcore::{ClientError, ConnectionState, Endpoint, Result, TransportFactory};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

struct Lifecycle {
    state: ConnectionState,
    // Bumped by every accepted connect; ties connect results to the attempt.
    epoch: u64,
    endpoint: Option<Endpoint>,
    last_error: Option<Arc<ClientError>>,
}

/// State shared between the public handle and the I/O task.
pub(crate) struct Shared {
    lifecycle: Mutex<Lifecycle>,
    pub(crate) handlers: Handlers,
}

impl Shared {
    fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                epoch: 0,
                endpoint: None,
                last_error: None,
            }),
            handlers: Handlers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Records the target of attempt `epoch` once earlier links are gone.
    pub(crate) fn begin_attempt(&self, epoch: u64, endpoint: &Endpoint) {
        let mut lc = self.lock();
        if lc.epoch == epoch {
            lc.endpoint = Some(endpoint.clone());
        }
    }

    pub(crate) fn mark_connected(&self, epoch: u64) -> bool {
        let mut lc = self.lock();
        if lc.epoch != epoch || lc.state != ConnectionState::Connecting {
            return false;
        }
        lc.state = ConnectionState::Connected;
        lc.last_error = None;
        true
    }

    pub(crate) fn mark_failed(&self, epoch: u64, err: ClientError) {
        let mut lc = self.lock();
        if lc.epoch == epoch && lc.state == ConnectionState::Connecting {
            lc.state = ConnectionState::Failed;
            lc.last_error = Some(Arc::new(err));
        }
    }

    /// The live link went away without a disconnect call.
    pub(crate) fn mark_lost(&self, reason: Option<ClientError>) {
        let mut lc = self.lock();
        if lc.state != ConnectionState::Connected {
            return;
        }
        lc.state = match reason {
            Some(err) => {
                lc.last_error = Some(Arc::new(err));
                ConnectionState::Failed
            }
            None => ConnectionState::Disconnected,
        };
    }

    pub(crate) fn finish_disconnect(&self) {
        let mut lc = self.lock();
        if lc.state == ConnectionState::Disconnecting {
            lc.state = ConnectionState::Disconnected;
        }
    }
}

/// Callback-driven TCP client for the sensor link.
///
/// All network work happens on a dedicated I/O task. The public operations
/// only validate, update the lifecycle state, and hand a command to that task,
/// so none of them wait on the network. Callbacks run on the I/O task; a
/// consumer that needs another execution context must re-dispatch itself.
///
/// Dropping the client stops the I/O task and closes any live connection
/// without firing callbacks.
pub struct SocketClient {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    config: ClientConfig,
}

impl SocketClient {
    /// Creates a client whose I/O task runs on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use [`Self::with_handle`]
    /// from synchronous code.
    pub fn new(config: ClientConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_handle(&Handle::current(), config, factory)
    }

    /// Creates a client whose I/O task runs on `handle`.
    pub fn with_handle(
        handle: &Handle,
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(shared.clone(), factory, command_rx, config.clone());
        handle.spawn(manager.run());
        Self {
            shared,
            command_tx,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The endpoint of the current or most recent connect attempt. A new
    /// target shows up here once the I/O task has torn down the previous
    /// connection and started dialing.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared.lock().endpoint.clone()
    }

    /// The most recent asynchronous failure (connect failure, lost link, or
    /// receive overflow). Cleared when a connection is established.
    pub fn last_error(&self) -> Option<Arc<ClientError>> {
        self.shared.lock().last_error.clone()
    }

    /// Starts connecting to `host:port`.
    ///
    /// Only validation and state errors are returned here. The outcome of the
    /// attempt itself is reported through the connection handler.
    pub fn connect(&self, host: &str, port: u32) -> Result<()> {
        let endpoint = Endpoint::new(host, port)?;

        let mut lc = self.shared.lock();
        match lc.state {
            ConnectionState::Connecting => return Err(ClientError::AlreadyConnecting),
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            _ => {}
        }

        let epoch = lc.epoch + 1;
        self.command_tx
            .send(ConnectionCommand::Open {
                epoch,
                endpoint: endpoint.clone(),
            })
            .map_err(|_| ClientError::IoTaskStopped)?;

        info!(target: "SocketClient", "connect {endpoint} (epoch {epoch})");
        lc.epoch = epoch;
        lc.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Queues `data` for transmission. Bytes go out in call order.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_all(std::iter::once(data.into()))
    }

    /// Queues several buffers under one state check so no other send can
    /// interleave with them.
    pub(crate) fn send_all(&self, chunks: impl IntoIterator<Item = Bytes>) -> Result<()> {
        // Held across the enqueue so an accepted send is ordered before any
        // close that follows it.
        let lc = self.shared.lock();
        if lc.state != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        for chunk in chunks {
            self.command_tx
                .send(ConnectionCommand::Write(chunk))
                .map_err(|_| ClientError::IoTaskStopped)?;
        }
        Ok(())
    }

    /// Tears the connection down, aborting an attempt still in progress.
    /// Calling it when already disconnected does nothing.
    pub fn disconnect(&self) {
        let mut lc = self.shared.lock();
        match lc.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                debug!(target: "SocketClient", "disconnect: nothing to do ({})", lc.state);
            }
            ConnectionState::Failed => {
                lc.state = ConnectionState::Disconnected;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!(target: "SocketClient", "disconnect ({})", lc.state);
                if self.command_tx.send(ConnectionCommand::Close).is_err() {
                    warn!(target: "SocketClient", "I/O task has stopped");
                    lc.state = ConnectionState::Disconnected;
                    return;
                }
                lc.state = ConnectionState::Disconnecting;
            }
        }
    }

    /// Sets the handler called once per decoded response.
    pub fn set_response_handler<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.shared.handlers.set_response(Some(Arc::new(handler)));
    }

    pub fn clear_response_handler(&self) {
        self.shared.handlers.set_response(None);
    }

    /// Sets the handler called with `true` when a connection is established
    /// and `false` when an attempt fails or a connection ends.
    pub fn set_connection_handler<F>(&self, handler: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.handlers.set_connection(Some(Arc::new(handler)));
    }

    pub fn clear_connection_handler(&self) {
        self.shared.handlers.set_connection(None);
    }

    /// Sets the handler for receive-side errors: oversized units and, with
    /// [`DecodePolicy::Drop`](linkcore::DecodePolicy::Drop), undecodable ones.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.shared.handlers.set_error(Some(Arc::new(handler)));
    }

    pub fn clear_error_handler(&self) {
        self.shared.handlers.set_error(None);
    }
}
