//! Publish/subscribe bus connection.
//!
//! [`BusClient`] owns the broker connection and its [`ConnectionState`]. All
//! transport progress is cooperative: nothing happens unless the owner calls
//! [`BusClient::service_tick`] (directly or through the other operations).

mod mqtt;
mod transport;

pub use mqtt::MqttTransport;
pub use transport::{EventSink, Transport};

use crate::error::BusError;
use log::{debug, info, warn};
use std::time::Duration;
use strum::Display;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Payload sent in place of an empty body.
pub const NO_CONTENT: &str = "<NO CONTENT>";

/// Default time to wait for the broker to acknowledge a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Service passes performed by [`BusClient::drain_inbound`] before collecting.
const DRAIN_SERVICE_PASSES: usize = 10;

/// Pause between service passes while waiting for an acknowledgment.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);

const STATE_CHANNEL_CAPACITY: usize = 32;

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Connection state and inbox, updated by transport events.
struct BusState {
    connection: ConnectionState,
    inbox: Vec<InboundMessage>,
    last_error: Option<String>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl BusState {
    fn set(&mut self, next: ConnectionState) {
        if self.connection == next {
            return;
        }
        debug!("[Bus] {} -> {}", self.connection, next);
        self.connection = next;
        // Nobody listening is fine
        let _ = self.transitions.send(next);
    }
}

impl EventSink for BusState {
    fn on_connect(&mut self) {
        self.last_error = None;
        self.set(ConnectionState::Connected);
    }

    fn on_disconnect(&mut self, reason: Option<&str>) {
        if let Some(reason) = reason {
            self.last_error = Some(reason.to_string());
        }
        self.set(ConnectionState::Disconnected);
    }

    fn on_message(&mut self, message: InboundMessage) {
        debug!(
            "[Bus] Received message on {} ({} bytes)",
            message.topic,
            message.payload.len()
        );
        self.inbox.push(message);
    }
}

/// Owner of the broker connection.
pub struct BusClient<T: Transport> {
    transport: T,
    state: BusState,
    subscriptions: Vec<String>,
    connect_timeout: Duration,
}

impl<T: Transport> BusClient<T> {
    pub fn new(transport: T, connect_timeout: Duration) -> Self {
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            transport,
            state: BusState {
                connection: ConnectionState::Disconnected,
                inbox: Vec::new(),
                last_error: None,
                transitions,
            },
            subscriptions: Vec::new(),
            connect_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.connection
    }

    pub fn is_connected(&self) -> bool {
        self.state.connection == ConnectionState::Connected
    }

    /// Stream of state transitions from now on.
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.transitions.subscribe()
    }

    /// Topics registered through [`subscribe`](Self::subscribe).
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Connect and wait for the broker's acknowledgment.
    ///
    /// On timeout the client is left `Disconnected`; retrying is up to the
    /// caller, preferably through [`reconnect`](Self::reconnect).
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), BusError> {
        self.state.set(ConnectionState::Connecting);
        if let Err(e) = self.transport.connect() {
            self.state.set(ConnectionState::Disconnected);
            return Err(e);
        }
        self.await_acknowledgment(cancel).await
    }

    /// Reconnect after a disconnect and restore subscriptions.
    pub async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<(), BusError> {
        // A late acknowledgment from a previous attempt may already be queued
        self.service_tick().await;
        if self.is_connected() {
            return self.resubscribe();
        }

        self.state.set(ConnectionState::Reconnecting);
        if let Err(e) = self.transport.reconnect() {
            self.state.set(ConnectionState::Disconnected);
            return Err(e);
        }
        self.await_acknowledgment(cancel).await?;
        self.resubscribe()
    }

    async fn await_acknowledgment(&mut self, cancel: &CancellationToken) -> Result<(), BusError> {
        // A timeout too large to represent means waiting without a deadline
        let deadline = Instant::now().checked_add(self.connect_timeout);

        loop {
            self.service_tick().await;

            match self.state.connection {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => {
                    let reason = self
                        .state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "connection refused".to_string());
                    return Err(BusError::ConnectFailed(reason));
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }

            if cancel.is_cancelled() {
                self.state.set(ConnectionState::Disconnected);
                return Err(BusError::Cancelled);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.state.set(ConnectionState::Disconnected);
                return Err(BusError::ConnectTimeout(self.connect_timeout.as_secs()));
            }

            tokio::time::sleep(ACK_POLL_INTERVAL).await;
        }
    }

    fn resubscribe(&mut self) -> Result<(), BusError> {
        for topic in &self.subscriptions {
            self.transport.subscribe(topic)?;
        }
        Ok(())
    }

    /// Register interest in a topic.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        info!("[Bus] Subscribing to {}", topic);
        self.transport.subscribe(topic)?;
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    /// Best-effort, at-most-once publish.
    ///
    /// An empty payload is replaced by [`NO_CONTENT`].
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let payload = if payload.is_empty() {
            NO_CONTENT.as_bytes()
        } else {
            payload
        };
        debug!("[Bus] Publishing to {}: {}", topic, String::from_utf8_lossy(payload));
        self.transport.publish(topic, payload)
    }

    /// One non-blocking pass of transport I/O and event dispatch.
    pub async fn service_tick(&mut self) {
        if let Err(e) = self.transport.service(&mut self.state).await {
            warn!("[Bus] Transport service failed: {}", e);
            self.state.on_disconnect(Some(&e.to_string()));
        }
    }

    /// Service the transport, then hand over everything received since the
    /// last drain in arrival order.
    pub async fn drain_inbound(&mut self) -> Vec<InboundMessage> {
        for _ in 0..DRAIN_SERVICE_PASSES {
            self.service_tick().await;
        }
        self.take_inbound()
    }

    /// Hand over received messages without servicing the transport.
    pub fn take_inbound(&mut self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.state.inbox)
    }

    /// Tear down the connection from whatever state it is in.
    pub async fn shutdown(&mut self) {
        info!("[Bus] Shutting down connection");
        self.transport.shutdown().await;
        self.state.set(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use tokio_test::{assert_err, assert_ok};

    fn client(transport: MockTransport) -> BusClient<MockTransport> {
        BusClient::new(transport, DEFAULT_CONNECT_TIMEOUT)
    }

    fn client_with_timeout(
        transport: MockTransport,
        config: &crate::config::Config,
    ) -> BusClient<MockTransport> {
        BusClient::new(transport, config.mqtt.connect_timeout())
    }

    fn drain_transitions(rx: &mut broadcast::Receiver<ConnectionState>) -> Vec<ConnectionState> {
        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_transitions() {
        let mut bus = client(MockTransport::accepting());
        let mut rx = bus.state_changes();
        assert_eq!(bus.state(), ConnectionState::Disconnected);

        assert_ok!(bus.connect(&CancellationToken::new()).await);

        assert!(bus.is_connected());
        assert_eq!(
            drain_transitions(&mut rx),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_transitions() {
        let mut bus = client(MockTransport::silent());
        let mut rx = bus.state_changes();
        let started = Instant::now();

        let result = bus.connect(&CancellationToken::new()).await;

        assert!(matches!(result, Err(BusError::ConnectTimeout(5))));
        assert!(started.elapsed() >= DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
        assert_eq!(
            drain_transitions(&mut rx),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_waits_without_deadline() {
        let config = crate::config::Config::from_lookup(|key| {
            (key == "CONNECT_TIMEOUT").then(|| u64::MAX.to_string())
        });
        let mut bus = client_with_timeout(MockTransport::accepting(), &config);
        assert_ok!(bus.connect(&CancellationToken::new()).await);

        let cancel = CancellationToken::new();
        let mut silent = client_with_timeout(MockTransport::silent(), &config);
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                cancel.cancel();
            })
        };
        let result = silent.connect(&cancel).await;
        stopper.await.unwrap();

        assert!(matches!(result, Err(BusError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_fails_before_timeout() {
        let mut transport = MockTransport::silent();
        transport.refuse_next_attempts(1, "Connection refused");
        let mut bus = client(transport);
        let started = Instant::now();

        let result = bus.connect(&CancellationToken::new()).await;

        assert!(matches!(result, Err(BusError::ConnectFailed(ref r)) if r == "Connection refused"));
        assert!(started.elapsed() < DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_returns_promptly() {
        let mut bus = client(MockTransport::silent());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = bus.connect(&cancel).await;

        assert!(matches!(result, Err(BusError::Cancelled)));
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_is_replaced() {
        let mut bus = client(MockTransport::accepting());
        assert_ok!(bus.connect(&CancellationToken::new()).await);

        assert_ok!(bus.publish("sensor/s1/bluetooth/hello", b""));
        assert_ok!(bus.publish("sensor/s1/bluetooth/available", b"AA:BB"));

        let published = &bus.transport().published;
        assert_eq!(published[0].1, NO_CONTENT.as_bytes());
        assert_eq!(published[1].1, b"AA:BB");
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let mut bus = client(MockTransport::accepting());
        let result = bus.publish("sensor/s1/bluetooth/hello", b"");
        assert!(matches!(result, Err(BusError::NotConnected)));
        assert!(bus.transport().published.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_publish_is_reported() {
        let mut bus = client(MockTransport::accepting());
        assert_ok!(bus.connect(&CancellationToken::new()).await);
        bus.transport_mut().reject_publish = true;

        assert_err!(bus.publish("sensor/s1/bluetooth/available", b"AA:BB"));
        assert!(bus.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_preserves_arrival_order_and_clears() {
        let mut bus = client(MockTransport::accepting());
        assert_ok!(bus.connect(&CancellationToken::new()).await);

        bus.transport_mut().inject_message("command/scan/bluetooth", b"");
        bus.transport_mut().inject_message("command/fetch_device_database", b"now");

        let drained = bus.drain_inbound().await;
        let topics: Vec<&str> = drained.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["command/scan/bluetooth", "command/fetch_device_database"]);
        assert_eq!(drained[1].payload, b"now");

        assert!(bus.drain_inbound().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_surfaces_on_service_tick() {
        let mut bus = client(MockTransport::accepting());
        assert_ok!(bus.connect(&CancellationToken::new()).await);

        bus.transport_mut().drop_connection("Connection lost");
        assert!(bus.is_connected());

        bus.service_tick().await;
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_restores_subscriptions() {
        let mut bus = client(MockTransport::accepting());
        let cancel = CancellationToken::new();
        assert_ok!(bus.connect(&cancel).await);
        assert_ok!(bus.subscribe("command/fetch_device_database"));
        assert_ok!(bus.subscribe("command/scan/bluetooth"));

        bus.transport_mut().drop_connection("Connection lost");
        bus.service_tick().await;
        let mut rx = bus.state_changes();

        assert_ok!(bus.reconnect(&cancel).await);

        assert_eq!(
            drain_transitions(&mut rx),
            vec![ConnectionState::Reconnecting, ConnectionState::Connected]
        );
        assert_eq!(bus.transport().reconnect_calls, 1);
        assert_eq!(
            bus.transport().subscribed,
            vec![
                "command/fetch_device_database",
                "command/scan/bluetooth",
                "command/fetch_device_database",
                "command/scan/bluetooth",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timeout_returns_to_disconnected() {
        let mut bus = client(MockTransport::accepting());
        let cancel = CancellationToken::new();
        assert_ok!(bus.connect(&cancel).await);
        bus.transport_mut().drop_connection("Connection lost");
        bus.service_tick().await;
        bus.transport_mut().ignore_next_attempts(1);

        let result = bus.reconnect(&cancel).await;

        assert!(matches!(result, Err(BusError::ConnectTimeout(_))));
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_from_connected() {
        let mut bus = client(MockTransport::accepting());
        assert_ok!(bus.connect(&CancellationToken::new()).await);

        bus.shutdown().await;

        assert!(bus.transport().shut_down);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }
}
