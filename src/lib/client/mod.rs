use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

pub mod handler;
mod pool;
pub mod transport;

pub use handler::{Cat240Handler, ChannelHandler, ClientEvent};
pub use transport::{
    ListenerTransport, MulticastTransport, PointToPointTransport, SourceSpec, Transport,
    TransportKind,
};

use crate::cat240::DecodeOptions;
use pool::{DecodeContext, DecodePool};

// Large enough for any UDP datagram
const MAX_DATAGRAM: usize = 65536;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O operation failed")]
    Io(#[from] io::Error),
    #[error("Shutdown")]
    Shutdown,
    #[error("Timeout")]
    Timeout,
    #[error("Invalid source '{0}'")]
    InvalidSource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Receiving,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Wait between losing the socket and opening it again
    pub reconnect_delay_ms: u64,
    /// How long `ClientHandle::shutdown` waits for the client to wind down
    pub stop_timeout_ms: u64,
    pub workers: usize,
    pub queue_depth: usize,
    pub decode: DecodeOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reconnect_delay_ms: 1000,
            stop_timeout_ms: 5000,
            workers: 1,
            queue_depth: 64,
            decode: DecodeOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Counters for one client; shared with its decode workers.
#[derive(Debug, Default)]
pub struct Statistics {
    pub received: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub queue_full: AtomicU64,
    pub invalid_spec: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub received: u64,
    pub decoded: u64,
    pub decode_errors: u64,
    pub queue_full: u64,
    pub invalid_spec: u64,
    pub reconnects: u64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            invalid_spec: self.invalid_spec.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

///
/// Control side of a running client, cloneable and usable from any task.
///
#[derive(Clone)]
pub struct ClientHandle {
    stop: CancellationToken,
    connection: Arc<Mutex<CancellationToken>>,
    state_rx: watch::Receiver<ClientState>,
    statistics: Arc<Statistics>,
    stop_timeout: Duration,
}

impl ClientHandle {
    pub fn state(&self) -> ClientState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ClientState> {
        self.state_rx.clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    ///
    /// Close the current socket without stopping. The client reports the
    /// disconnect and opens the socket again after the reconnect delay.
    /// Does nothing while no socket is open.
    ///
    pub fn disconnect(&self) {
        if let Ok(connection) = self.connection.lock() {
            connection.cancel();
        }
    }

    ///
    /// Request a stop and wait up to `timeout` for the client to close its
    /// socket and finish the datagrams already queued. Once this returns Ok
    /// the handler sees no further calls. If the client went away without
    /// finishing this is `ClientError::Shutdown`.
    ///
    pub async fn stop(&self, timeout: Duration) -> Result<(), ClientError> {
        self.stop.cancel();

        let mut state_rx = self.state_rx.clone();
        match tokio::time::timeout(
            timeout,
            state_rx.wait_for(|s| *s == ClientState::Stopped),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Shutdown),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// `stop` with the configured stop timeout.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.stop(self.stop_timeout).await
    }
}

///
/// Receives CAT240 datagrams from one source and hands them, decoded, to
/// the handler. Runs until stopped, reopening the socket after every
/// failure.
///
pub struct Cat240Client {
    id: usize,
    key: String,
    transport: Box<dyn Transport>,
    handler: Arc<dyn Cat240Handler>,
    config: ClientConfig,
    state_tx: watch::Sender<ClientState>,
    stop: CancellationToken,
    connection: Arc<Mutex<CancellationToken>>,
    statistics: Arc<Statistics>,
}

impl Cat240Client {
    pub fn new(
        id: usize,
        transport: Box<dyn Transport>,
        handler: Arc<dyn Cat240Handler>,
        config: ClientConfig,
    ) -> Self {
        let key = format!("{}#{}@{}", transport.kind(), id, transport.endpoint());
        let (state_tx, _) = watch::channel(ClientState::Disconnected);

        Cat240Client {
            id,
            key,
            transport,
            handler,
            config,
            state_tx,
            stop: CancellationToken::new(),
            connection: Arc::new(Mutex::new(CancellationToken::new())),
            statistics: Arc::new(Statistics::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            stop: self.stop.clone(),
            connection: self.connection.clone(),
            state_rx: self.state_tx.subscribe(),
            statistics: self.statistics.clone(),
            stop_timeout: self.config.stop_timeout(),
        }
    }

    fn set_state(&self, state: ClientState) {
        log::trace!("{}: {}", self.key, state);
        self.state_tx.send_replace(state);
    }

    ///
    /// Run as a graceful shutdown subsystem: a shutdown request stops the
    /// client the same way `ClientHandle::stop` does.
    ///
    pub async fn run_subsystem(self, subsys: SubsystemHandle) -> Result<(), ClientError> {
        let stop = self.stop.clone();
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            r = &mut run => r,
            _ = subsys.on_shutdown_requested() => {
                stop.cancel();
                run.await
            }
        }
    }

    pub async fn run(mut self) -> Result<(), ClientError> {
        let pool = DecodePool::new(
            self.config.workers,
            self.config.queue_depth,
            DecodeContext {
                key: self.key.clone(),
                client_id: self.id,
                options: self.config.decode,
                handler: self.handler.clone(),
                statistics: self.statistics.clone(),
            },
        );
        let mut connected_at_stop = false;

        while !self.stop.is_cancelled() {
            self.set_state(ClientState::Connecting);

            match self.transport.connect().await {
                Ok(()) => {
                    let addr = self.transport.endpoint();
                    let connection = self.new_connection();
                    log::info!("{}: receiving CAT240 on {}", self.key, addr);
                    self.handler.on_connected(self.id, addr);
                    self.set_state(ClientState::Receiving);

                    let r = self.receive_loop(&pool, connection).await;

                    self.transport.disconnect();
                    match r {
                        Ok(()) => {
                            log::info!("{}: disconnected on request", self.key);
                            self.set_state(ClientState::Disconnected);
                            self.handler.on_disconnected(self.id, addr);
                        }
                        Err(ClientError::Shutdown) => {
                            connected_at_stop = true;
                            break;
                        }
                        Err(ClientError::Io(e)) => {
                            log::error!("{}: receive error: {}", self.key, e);
                            self.set_state(ClientState::Disconnected);
                            self.handler.on_error(self.id, addr, &e);
                            self.handler.on_disconnected(self.id, addr);
                        }
                        Err(e) => {
                            log::error!("{}: receive loop ended: {}", self.key, e);
                            self.set_state(ClientState::Disconnected);
                            self.handler.on_disconnected(self.id, addr);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{}: cannot open socket: {}", self.key, e);
                    self.set_state(ClientState::Disconnected);
                    self.handler.on_error(self.id, self.transport.endpoint(), &e);
                }
            }

            log::debug!("{}: {:?}", self.key, self.statistics.snapshot());

            tokio::select! {
                _ = self.stop.cancelled() => {
                    break;
                },
                _ = sleep(self.config.reconnect_delay()) => {
                    self.statistics.reconnects.fetch_add(1, Ordering::Relaxed);
                    log::debug!("{}: reconnecting", self.key);
                },
            }
        }

        self.set_state(ClientState::Stopping);
        pool.drain().await;
        if connected_at_stop {
            self.handler.on_disconnected(self.id, self.transport.endpoint());
        }
        log::info!("{}: stopped, {:?}", self.key, self.statistics.snapshot());
        self.set_state(ClientState::Stopped);
        Ok(())
    }

    // A fresh token per socket, so a disconnect request only ends this one
    fn new_connection(&self) -> CancellationToken {
        let token = CancellationToken::new();
        match self.connection.lock() {
            Ok(mut connection) => *connection = token.clone(),
            Err(e) => log::warn!("{}: disconnect requests unavailable: {}", self.key, e),
        }
        token
    }

    ///
    /// Ok when a disconnect was requested, `ClientError::Shutdown` on stop,
    /// otherwise the socket error.
    ///
    async fn receive_loop(
        &mut self,
        pool: &DecodePool,
        connection: CancellationToken,
    ) -> Result<(), ClientError> {
        let stop = self.stop.clone();
        let mut buf = Vec::with_capacity(MAX_DATAGRAM);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    return Err(ClientError::Shutdown);
                },
                _ = connection.cancelled() => {
                    return Ok(());
                },
                r = self.transport.recv(&mut buf) => {
                    let (len, from) = r?;
                    self.statistics.received.fetch_add(1, Ordering::Relaxed);
                    log::trace!("{}: {} octets from {}", self.key, len, from);

                    if pool.submit(buf[..len].to_vec()).is_err() {
                        self.statistics.queue_full.fetch_add(1, Ordering::Relaxed);
                        log::warn!("{}: decode queue full, dropping datagram", self.key);
                    }
                },
            }
            buf.clear();
        }
    }
}
