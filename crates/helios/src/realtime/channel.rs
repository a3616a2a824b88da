//! Reconnecting realtime channel.
//!
//! A [`RealtimeChannel`] is a handle to a driver task that owns the socket,
//! the reconnect timer, the heartbeat interval and the retry counter. Handle
//! methods are commands to that task; frames, connect results and timer
//! firings are handled as turns of the same `select!` loop.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use helios_protocol::{InboundEvent, OutboundMessage};

use super::backoff::BackoffPolicy;
use super::dispatch::EventHandler;
use super::endpoint::Endpoint;
use super::status::{ChannelStatus, ConnectionState};
use super::transport::{Connector, Frame, Socket, TransportError};

/// Heartbeat period while the channel is open.
pub const PING_INTERVAL_SECS: u64 = 30;

/// Upper bound on a single connect attempt.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

const COMMAND_BUFFER: usize = 32;

/// Channel parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub endpoint: Endpoint,
    /// WebSocket base, e.g. `ws://localhost:8000`.
    pub base_url: String,
    pub backoff: BackoffPolicy,
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(endpoint: Endpoint, base_url: impl Into<String>) -> Self {
        Self {
            endpoint,
            base_url: base_url.into(),
            backoff: BackoffPolicy::default(),
            heartbeat_interval: Duration::from_secs(PING_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn url(&self) -> String {
        self.endpoint.url(&self.base_url)
    }
}

/// Why an outbound message was not sent.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("channel is not open (state: {0})")]
    NotConnected(ConnectionState),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("channel driver has stopped")]
    Closed,
}

enum Command {
    Connect {
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send {
        text: String,
        ack: oneshot::Sender<Result<(), SendError>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running channel. Dropping it stops the driver.
pub struct RealtimeChannel {
    id: Uuid,
    endpoint: Endpoint,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ChannelStatus>,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl RealtimeChannel {
    /// Start the driver task. The channel stays disconnected until
    /// [`connect`](Self::connect) is called.
    pub fn spawn(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let id = Uuid::new_v4();
        let endpoint = config.endpoint.clone();
        let url = config.url();

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(ChannelStatus {
            endpoint: Some(url.clone()),
            ..ChannelStatus::default()
        });
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            config,
            url,
            connector,
            handler,
            status_tx,
            commands: command_rx,
            attempt_tx,
            attempt_rx,
            state: ConnectionState::Disconnected,
            retries: 0,
            exhausted: false,
            generation: 0,
            attempt: None,
            socket: None,
            reconnect: None,
            heartbeat: None,
            last_message_at: None,
        };

        let span = tracing::info_span!("realtime", channel = %id, endpoint = %endpoint);
        let driver = tokio::spawn(driver.run().instrument(span));

        Self {
            id,
            endpoint,
            commands,
            status,
            driver,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start connecting. No-op while open or connecting; otherwise resets the
    /// retry counter and the exhausted flag, and cancels a pending reconnect.
    pub async fn connect(&self) {
        let (ack, done) = oneshot::channel();
        self.request(Command::Connect { ack }, done).await;
    }

    /// Close the socket and cancel both timers. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        self.request(Command::Disconnect { ack }, done).await;
    }

    /// Send a message. Fails unless the channel is open.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let text = message.to_json()?;
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Send { text, ack }).await.is_err() {
            return Err(SendError::Closed);
        }
        let result = done.await.unwrap_or(Err(SendError::Closed));
        if let Err(e) = &result {
            warn!(endpoint = %self.endpoint, "Dropping {} message: {}", message.event, e);
        }
        result
    }

    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Wait until the channel reports open. Returns `false` on timeout or if
    /// the driver stopped.
    pub async fn wait_until_open(&self, timeout: Duration) -> bool {
        let mut status = self.status.clone();
        match tokio::time::timeout(timeout, status.wait_for(ChannelStatus::is_open)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    /// Disconnect and stop the driver.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        self.request(Command::Shutdown { ack }, done).await;
    }

    async fn request(&self, command: Command, done: oneshot::Receiver<()>) {
        if self.commands.send(command).await.is_err() || done.await.is_err() {
            debug!(endpoint = %self.endpoint, "Channel driver already stopped");
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct AttemptResult {
    generation: u64,
    result: Result<Socket, TransportError>,
}

struct Driver {
    config: ChannelConfig,
    url: String,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn EventHandler>,
    status_tx: watch::Sender<ChannelStatus>,
    commands: mpsc::Receiver<Command>,
    attempt_tx: mpsc::UnboundedSender<AttemptResult>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptResult>,

    state: ConnectionState,
    retries: u32,
    exhausted: bool,
    /// Bumped for every attempt and on disconnect; older results are stale.
    generation: u64,
    attempt: Option<JoinHandle<()>>,
    socket: Option<Socket>,
    reconnect: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    last_message_at: Option<DateTime<Utc>>,
}

impl Driver {
    async fn run(mut self) {
        debug!("Channel driver started for {}", self.url);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { ack }) => {
                        self.disconnect().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                Some(attempt) = self.attempt_rx.recv() => self.on_attempt(attempt).await,
                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,
                () = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.start_attempt().await;
                }
                () = tick(&mut self.heartbeat) => self.send_ping().await,
            }
        }

        debug!("Channel driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { ack } => {
                self.connect().await;
                let _ = ack.send(());
            }
            Command::Disconnect { ack } => {
                self.disconnect().await;
                let _ = ack.send(());
            }
            Command::Send { text, ack } => {
                let result = self.send_text(text).await;
                let _ = ack.send(result);
            }
            Command::Shutdown { ack } => {
                self.disconnect().await;
                let _ = ack.send(());
            }
        }
    }

    async fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            debug!("Connect ignored, channel is {}", self.state);
            return;
        }
        self.retries = 0;
        self.exhausted = false;
        self.reconnect = None;
        self.start_attempt().await;
    }

    async fn start_attempt(&mut self) {
        self.generation += 1;
        if let Some(previous) = self.attempt.take() {
            previous.abort();
        }

        info!("Connecting to {} (attempt {})", self.url, self.retries + 1);
        self.state = ConnectionState::Connecting;

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let timeout = self.config.connect_timeout;
        let results = self.attempt_tx.clone();

        let attempt = async move {
            let result = match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };
            let _ = results.send(AttemptResult { generation, result });
        };
        self.attempt = Some(tokio::spawn(attempt.in_current_span()));

        self.publish().await;
    }

    async fn on_attempt(&mut self, attempt: AttemptResult) {
        if attempt.generation != self.generation || self.state != ConnectionState::Connecting {
            debug!("Discarding result of stale connect attempt");
            return;
        }
        self.attempt = None;

        match attempt.result {
            Ok(socket) => {
                info!("Connected to {}", self.url);
                self.socket = Some(socket);
                self.state = ConnectionState::Open;
                self.retries = 0;
                self.exhausted = false;
                self.start_heartbeat();
                self.publish().await;
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", self.url, e);
                self.on_connection_lost().await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Frame, TransportError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.on_text(&text).await,
            Some(Ok(Frame::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => self.on_text(&text).await,
                Err(_) => warn!("Discarding binary frame that is not UTF-8"),
            },
            Some(Ok(Frame::Close { code, reason })) => {
                info!(
                    "Server closed connection (code: {}, reason: {:?})",
                    code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                    reason
                );
                self.on_connection_lost().await;
            }
            Some(Err(e)) => {
                warn!("Socket error: {}", e);
                self.on_connection_lost().await;
            }
            None => {
                info!("Socket stream ended");
                self.on_connection_lost().await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        match InboundEvent::decode(text) {
            Ok(event) => {
                debug!("Received {}", event.name());
                self.last_message_at = Some(Utc::now());
                self.handler.handle_event(event).await;
                self.publish().await;
            }
            Err(e) => warn!("Discarding malformed frame: {}", e),
        }
    }

    /// Tear down after a failed attempt, an error or a close, then schedule
    /// the next attempt unless the retry budget is spent.
    async fn on_connection_lost(&mut self) {
        self.heartbeat = None;
        if let Some(mut socket) = self.socket.take()
            && let Err(e) = socket.sink.close().await
        {
            debug!("Error closing socket: {}", e);
        }

        self.state = ConnectionState::Disconnected;
        self.retries = self.retries.saturating_add(1);

        if self.config.backoff.exhausted(self.retries) {
            self.exhausted = true;
            self.reconnect = None;
            error!(
                "Giving up on {} after {} failed attempts",
                self.url, self.retries
            );
        } else {
            let delay = self.config.backoff.delay(self.retries);
            info!(
                "Reconnecting in {:.1}s (failure {}{})",
                delay.as_secs_f64(),
                self.retries,
                self.config
                    .backoff
                    .max_retries
                    .map(|max| format!(" of {max}"))
                    .unwrap_or_default()
            );
            self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        }

        self.publish().await;
    }

    async fn disconnect(&mut self) {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.reconnect = None;
        self.heartbeat = None;

        if let Some(mut socket) = self.socket.take() {
            self.state = ConnectionState::Closing;
            self.publish().await;
            if let Err(e) = socket.sink.close().await {
                debug!("Error closing socket: {}", e);
            }
            info!("Disconnected from {}", self.url);
        }

        self.state = ConnectionState::Disconnected;
        self.retries = 0;
        self.exhausted = false;
        self.publish().await;
    }

    async fn send_text(&mut self, text: String) -> Result<(), SendError> {
        if self.state != ConnectionState::Open {
            return Err(SendError::NotConnected(self.state));
        }
        let Some(socket) = self.socket.as_mut() else {
            return Err(SendError::NotConnected(self.state));
        };

        match socket.sink.send(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Send failed: {}", e);
                self.on_connection_lost().await;
                Err(SendError::Transport(e))
            }
        }
    }

    fn start_heartbeat(&mut self) {
        let period = self.config.heartbeat_interval;
        if period.is_zero() {
            self.heartbeat = None;
            return;
        }
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    async fn send_ping(&mut self) {
        let text = match OutboundMessage::ping().to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode heartbeat: {}", e);
                return;
            }
        };
        if let Err(e) = self.send_text(text).await {
            warn!("Heartbeat not sent: {}", e);
        }
    }

    async fn publish(&mut self) {
        let status = ChannelStatus {
            state: self.state,
            retries: self.retries,
            exhausted: self.exhausted,
            reconnect_pending: self.reconnect.is_some(),
            heartbeat_active: self.heartbeat.is_some(),
            last_message_at: self.last_message_at,
            endpoint: Some(self.url.clone()),
        };

        if *self.status_tx.borrow() == status {
            return;
        }
        // handler first, so status watchers never run ahead of the store
        self.handler.status_changed(&status).await;
        self.status_tx.send_replace(status);
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Frame, TransportError>> {
    match socket {
        Some(socket) => socket.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::MemoryConnector;
    use crate::realtime::StoreDispatcher;
    use crate::store::Store;

    fn channel(connector: &MemoryConnector, store: &Store) -> RealtimeChannel {
        let config = ChannelConfig::new(Endpoint::user("u1"), "ws://test");
        RealtimeChannel::spawn(
            config,
            Arc::new(connector.clone()),
            Arc::new(StoreDispatcher::new(store.clone(), None)),
        )
    }

    #[test]
    fn test_config_url() {
        let config = ChannelConfig::new(Endpoint::task("t1"), "ws://localhost:8000/");
        assert_eq!(config.url(), "ws://localhost:8000/ws/tasks/t1/messages");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_and_mirrors_status() {
        let connector = MemoryConnector::new();
        let _peer = connector.accept_next();
        let store = Store::new();
        let channel = channel(&connector, &store);

        channel.connect().await;
        assert!(channel.wait_until_open(Duration::from_secs(1)).await);

        let status = channel.status();
        assert_eq!(status.retries, 0);
        assert!(status.heartbeat_active);
        assert!(!status.reconnect_pending);
        assert_eq!(connector.urls(), vec!["ws://test/ws/u1".to_string()]);
        assert_eq!(store.snapshot().connection.state, ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_open() {
        let connector = MemoryConnector::new();
        let _peer = connector.accept_next();
        let store = Store::new();
        let channel = channel(&connector, &store);

        channel.connect().await;
        assert!(channel.wait_until_open(Duration::from_secs(1)).await);
        channel.connect().await;
        channel.connect().await;

        assert_eq!(connector.attempts(), 1);
        assert!(channel.status().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_connect_fails() {
        let connector = MemoryConnector::new();
        let store = Store::new();
        let channel = channel(&connector, &store);

        let result = channel.send(&OutboundMessage::ping()).await;
        assert!(matches!(
            result,
            Err(SendError::NotConnected(ConnectionState::Disconnected))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let connector = MemoryConnector::new();
        connector.hang_next();
        let store = Store::new();
        let channel = channel(&connector, &store);

        channel.connect().await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        let status = channel.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.retries, 1);
        assert!(status.reconnect_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_driver() {
        let connector = MemoryConnector::new();
        let mut peer = connector.accept_next();
        let store = Store::new();
        let channel = channel(&connector, &store);

        channel.connect().await;
        assert!(channel.wait_until_open(Duration::from_secs(1)).await);
        channel.shutdown().await;

        assert_eq!(channel.status().state, ConnectionState::Disconnected);
        assert_eq!(peer.recv().await, None);
        assert!(matches!(
            channel.send(&OutboundMessage::ping()).await,
            Err(SendError::Closed)
        ));
    }
}
