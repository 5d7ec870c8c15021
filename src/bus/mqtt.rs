//! rumqttc-backed [`Transport`].

use super::{EventSink, InboundMessage, Transport};
use crate::config::MqttConfig;
use crate::error::BusError;
use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CHANNEL_CAPACITY: usize = 100;
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Event forwarded from the event loop task.
#[derive(Debug)]
enum LoopEvent {
    Connected,
    Disconnected(String),
    Message(InboundMessage),
}

/// MQTT connection driven by a rumqttc event loop.
///
/// Each connection attempt gets its own event loop, running in a task on the
/// caller's runtime and forwarding what it sees over a channel;
/// [`Transport::service`] yields once and dispatches everything queued. The
/// task ends after the first connection error. Starting a new attempt aborts
/// the previous one, so an attempt never retries on its own and its events
/// never leak into the next one.
pub struct MqttTransport {
    options: MqttOptions,
    client: Option<AsyncClient>,
    events: Option<mpsc::Receiver<LoopEvent>>,
    task: Option<JoinHandle<()>>,
    connected: bool,
}

impl MqttTransport {
    /// Create a transport from configuration. Nothing connects until
    /// [`Transport::connect`].
    pub fn new(config: &MqttConfig, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        Self {
            options,
            client: None,
            events: None,
            task: None,
            connected: false,
        }
    }

    /// Drop any attempt in flight and start a fresh one.
    fn start_attempt(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("[MQTT] Abandoning previous connection attempt");
            task.abort();
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.client = Some(client);
        self.events = Some(rx);
        self.connected = false;
        self.task = Some(tokio::spawn(Self::run(event_loop, tx)));
    }

    /// Run the MQTT event loop and forward connection events and messages
    /// until the connection fails.
    async fn run(mut event_loop: EventLoop, tx: mpsc::Sender<LoopEvent>) {
        debug!("[MQTT] Event loop started");

        loop {
            let (event, last) = match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => (LoopEvent::Connected, false),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message =
                        InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                    (LoopEvent::Message(message), false)
                }
                Ok(Event::Incoming(Packet::Disconnect)) => (
                    LoopEvent::Disconnected("Broker closed the connection".to_string()),
                    true,
                ),
                Ok(_) => continue,
                Err(e) => (LoopEvent::Disconnected(e.to_string()), true),
            };

            if tx.send(event).await.is_err() || last {
                break;
            }
        }

        debug!("[MQTT] Event loop stopped");
    }

    fn client(&self) -> Result<&AsyncClient, BusError> {
        self.client.as_ref().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<(), BusError> {
        let (host, port) = self.options.broker_address();
        info!("[MQTT] Connecting to {}:{}", host, port);
        self.start_attempt();
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), BusError> {
        info!("[MQTT] Starting new connection attempt");
        self.start_attempt();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        self.client()?
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.client()?
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn service(&mut self, sink: &mut dyn EventSink) -> Result<(), BusError> {
        tokio::task::yield_now().await;

        let Some(events) = self.events.as_mut() else {
            return Ok(());
        };

        loop {
            match events.try_recv() {
                Ok(LoopEvent::Connected) => {
                    info!("[MQTT] Connected to broker");
                    self.connected = true;
                    sink.on_connect();
                }
                Ok(LoopEvent::Disconnected(reason)) => {
                    warn!("[MQTT] Connection error: {}", reason);
                    self.connected = false;
                    sink.on_disconnect(Some(&reason));
                }
                Ok(LoopEvent::Message(message)) => sink.on_message(message),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    // The task reports its own failure before ending; a silent
                    // end while connected means it died
                    self.events = None;
                    self.task = None;
                    if self.connected {
                        self.connected = false;
                        sink.on_disconnect(Some("MQTT event loop stopped"));
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(client) = self.client.take()
            && let Err(e) = client.try_disconnect()
        {
            debug!("[MQTT] Disconnect request not queued: {}", e);
        }
        // Give the event loop a chance to flush the disconnect packet
        tokio::task::yield_now().await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events = None;
        self.connected = false;
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
