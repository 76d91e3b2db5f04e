use super::messages::{ConnectionCommand, OpenOutcome};
use crate::client::Shared;
use crate::config::ClientConfig;
use linkcore::{ClientError, FrameDecoder, Transport, TransportEvent, TransportFactory};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Link {
    transport: Arc<dyn Transport>,
    events: mpsc::Receiver<TransportEvent>,
}

struct PendingOpen {
    epoch: u64,
    task: JoinHandle<()>,
}

/// Owns the transport and the receive buffer. Every transport operation,
/// every state transition driven by the network, and every callback runs
/// on this task, one at a time.
///
/// Whoever removes a pending open or a live link fires that lifecycle's
/// terminal `connection(false)`, so each connect yields at most one.
pub(crate) struct ConnectionManager {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    opened_tx: mpsc::UnboundedSender<OpenOutcome>,
    opened_rx: mpsc::UnboundedReceiver<OpenOutcome>,
    pending: Option<PendingOpen>,
    link: Option<Link>,
    decoder: FrameDecoder,
    config: ClientConfig,
}

impl ConnectionManager {
    pub(crate) fn new(
        shared: Arc<Shared>,
        factory: Arc<dyn TransportFactory>,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        config: ClientConfig,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            factory,
            command_rx,
            opened_tx,
            opened_rx,
            pending: None,
            link: None,
            decoder: FrameDecoder::new(config.framing, config.max_buffer_size),
            config,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(target: "SocketClient/Io", "I/O task started");
        loop {
            tokio::select! {
                // Commands first: a queued close wins over pending deliveries.
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(outcome) = self.opened_rx.recv() => self.handle_opened(outcome).await,
                event = next_event(&mut self.link) => self.handle_event(event).await,
            }
        }

        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
        if let Some(link) = self.link.take() {
            link.transport.disconnect().await;
        }
        debug!(target: "SocketClient/Io", "I/O task stopped");
    }

    async fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Open { epoch, endpoint } => {
                // A close is always queued ahead of a reconnect, so anything
                // still here belongs to a lifecycle nobody is waiting on.
                self.teardown().await;
                self.shared.begin_attempt(epoch, &endpoint);

                info!(target: "SocketClient/Io", "Connecting to {endpoint}");
                let factory = self.factory.clone();
                let opened_tx = self.opened_tx.clone();
                let task = tokio::spawn(async move {
                    let result = factory.create_transport(&endpoint).await;
                    let _ = opened_tx.send(OpenOutcome { epoch, result });
                });
                self.pending = Some(PendingOpen { epoch, task });
            }
            ConnectionCommand::Write(data) => match &self.link {
                Some(link) => {
                    if let Err(e) = link.transport.send(&data).await {
                        warn!(target: "SocketClient/Io", "Dropping {} bytes: {e}", data.len());
                    }
                }
                None => {
                    warn!(
                        target: "SocketClient/Io",
                        "Dropping {} bytes: {}",
                        data.len(),
                        ClientError::WriteAfterClose
                    );
                }
            },
            ConnectionCommand::Close => {
                let was_live = self.teardown().await;
                self.shared.finish_disconnect();
                if was_live {
                    info!(target: "SocketClient/Io", "Disconnected");
                    self.shared.handlers.connection(false);
                }
            }
        }
    }

    /// Resolves a pending open. Exactly one connection event fires here:
    /// `true` if the link is adopted, `false` otherwise.
    async fn handle_opened(&mut self, outcome: OpenOutcome) {
        let current = matches!(&self.pending, Some(p) if p.epoch == outcome.epoch);
        if !current {
            // Cancelled attempt that finished anyway; its lifecycle already ended.
            debug!(target: "SocketClient/Io", "Discarding stale connect result (epoch {})", outcome.epoch);
            if let Ok((transport, _)) = outcome.result {
                transport.disconnect().await;
            }
            return;
        }
        self.pending = None;

        match outcome.result {
            Ok((transport, events)) => {
                if !self.shared.mark_connected(outcome.epoch) {
                    debug!(target: "SocketClient/Io", "Connect completed after disconnect, closing");
                    transport.disconnect().await;
                    self.shared.handlers.connection(false);
                    return;
                }
                self.decoder.clear();
                self.link = Some(Link { transport, events });
                info!(target: "SocketClient/Io", "Connected");
                self.shared.handlers.connection(true);
            }
            Err(e) => {
                warn!(target: "SocketClient/Io", "Connect failed: {e}");
                self.shared.mark_failed(outcome.epoch, e);
                self.shared.handlers.connection(false);
            }
        }
    }

    async fn handle_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::DataReceived(data)) => {
                trace!(target: "SocketClient/Io", "<-- {} bytes delivered", data.len());
                self.decoder.feed(&data);
                self.drain_units().await;
            }
            Some(TransportEvent::Disconnected(reason)) => self.lose_link(reason).await,
            // Every sender is gone without a goodbye; treat it as a clean close.
            None => self.lose_link(None).await,
        }
    }

    async fn drain_units(&mut self) {
        loop {
            match self.decoder.decode_frame() {
                Ok(Some(unit)) => {
                    match self.config.decode_policy.decode(unit) {
                        Ok(text) => self.shared.handlers.response(text),
                        Err(e) => {
                            warn!(target: "SocketClient/Io", "Dropping response: {e}");
                            self.shared.handlers.error(&e);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(target: "SocketClient/Io", "Receive buffer overflow: {e}");
                    self.shared.handlers.error(&e);
                    let was_live = self.teardown().await;
                    self.shared.mark_lost(Some(e));
                    if was_live {
                        self.shared.handlers.connection(false);
                    }
                    break;
                }
            }
        }
    }

    async fn lose_link(&mut self, reason: Option<ClientError>) {
        match &reason {
            Some(e) => warn!(target: "SocketClient/Io", "Connection lost: {e}"),
            None => info!(target: "SocketClient/Io", "Connection closed by peer"),
        }
        let was_live = self.teardown().await;
        self.shared.mark_lost(reason);
        if was_live {
            self.shared.handlers.connection(false);
        }
    }

    /// Aborts a pending open and closes the live transport. Returns whether
    /// there was anything to tear down.
    async fn teardown(&mut self) -> bool {
        let mut was_live = false;
        if let Some(pending) = self.pending.take() {
            debug!(target: "SocketClient/Io", "Aborting connect attempt (epoch {})", pending.epoch);
            pending.task.abort();
            was_live = true;
        }
        if let Some(link) = self.link.take() {
            link.transport.disconnect().await;
            was_live = true;
        }
        self.decoder.clear();
        was_live
    }
}

async fn next_event(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}
