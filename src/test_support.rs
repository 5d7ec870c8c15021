//! In-memory doubles for the sensor's collaborators.

use crate::bus::{EventSink, InboundMessage, Transport};
use crate::catalog::{CatalogSource, DeviceRecord};
use crate::error::{BusError, CatalogError, ProbeError};
use crate::probe::PresenceProbe;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};

enum MockEvent {
    Connected,
    Disconnected(String),
    Message(InboundMessage),
}

/// Scriptable broker connection that records everything sent through it.
#[derive(Default)]
pub struct MockTransport {
    pub published: Vec<(String, Vec<u8>)>,
    pub subscribed: Vec<String>,
    pub connect_calls: usize,
    pub reconnect_calls: usize,
    pub reject_publish: bool,
    pub reject_subscribe: bool,
    pub shut_down: bool,
    acknowledge: bool,
    ignored_attempts: usize,
    refused_attempts: usize,
    refusal_reason: String,
    pending: VecDeque<MockEvent>,
    replies: Vec<(String, InboundMessage)>,
}

impl MockTransport {
    /// Broker that acknowledges every connection attempt.
    pub fn accepting() -> Self {
        Self {
            acknowledge: true,
            ..Self::default()
        }
    }

    /// Broker that never answers.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Leave the next `count` attempts unanswered.
    pub fn ignore_next_attempts(&mut self, count: usize) {
        self.ignored_attempts = count;
    }

    /// Refuse the next `count` attempts with `reason`.
    pub fn refuse_next_attempts(&mut self, count: usize, reason: &str) {
        self.refused_attempts = count;
        self.refusal_reason = reason.to_string();
    }

    pub fn inject_message(&mut self, topic: &str, payload: &[u8]) {
        self.pending
            .push_back(MockEvent::Message(InboundMessage::new(topic, payload.to_vec())));
    }

    pub fn drop_connection(&mut self, reason: &str) {
        self.pending.push_back(MockEvent::Disconnected(reason.to_string()));
    }

    /// Deliver `message` once something is published on `topic`.
    pub fn reply_on_publish(&mut self, topic: &str, message: InboundMessage) {
        self.replies.push((topic.to_string(), message));
    }

    pub fn published_topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _)| t.as_str()).collect()
    }

    /// Published `(topic, payload)` pairs with payloads as text.
    pub fn published_text(&self) -> Vec<(String, String)> {
        self.published
            .iter()
            .map(|(t, p)| (t.clone(), String::from_utf8_lossy(p).into_owned()))
            .collect()
    }

    fn attempt(&mut self) {
        if self.refused_attempts > 0 {
            self.refused_attempts -= 1;
            self.pending
                .push_back(MockEvent::Disconnected(self.refusal_reason.clone()));
        } else if self.ignored_attempts > 0 {
            self.ignored_attempts -= 1;
        } else if self.acknowledge {
            self.pending.push_back(MockEvent::Connected);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), BusError> {
        self.connect_calls += 1;
        self.attempt();
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), BusError> {
        self.reconnect_calls += 1;
        self.attempt();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        if self.reject_subscribe {
            return Err(BusError::Transport("subscribe rejected".to_string()));
        }
        self.subscribed.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if self.reject_publish {
            return Err(BusError::Transport("publish rejected".to_string()));
        }
        self.published.push((topic.to_string(), payload.to_vec()));

        if let Some(index) = self.replies.iter().position(|(t, _)| t == topic) {
            let (_, message) = self.replies.remove(index);
            self.pending.push_back(MockEvent::Message(message));
        }
        Ok(())
    }

    async fn service(&mut self, sink: &mut dyn EventSink) -> Result<(), BusError> {
        while let Some(event) = self.pending.pop_front() {
            match event {
                MockEvent::Connected => sink.on_connect(),
                MockEvent::Disconnected(reason) => sink.on_disconnect(Some(&reason)),
                MockEvent::Message(message) => sink.on_message(message),
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.shut_down = true;
        self.pending.clear();
    }
}

/// Probe with fixed answers.
pub struct ScriptedProbe {
    pub probed: Vec<String>,
    pub discover_calls: usize,
    address: String,
    reachable: HashSet<String>,
    failing: HashSet<String>,
    discovery: Option<Vec<DeviceRecord>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            probed: Vec::new(),
            discover_calls: 0,
            address: "00:1A:7D:DA:71:13".to_string(),
            reachable: HashSet::new(),
            failing: HashSet::new(),
            discovery: Some(Vec::new()),
        }
    }

    pub fn with_reachable(mut self, addresses: &[&str]) -> Self {
        self.reachable = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Queries for these addresses fail outright.
    pub fn with_failing(mut self, addresses: &[&str]) -> Self {
        self.failing = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_discovery(mut self, devices: Vec<DeviceRecord>) -> Self {
        self.discovery = Some(devices);
        self
    }

    pub fn with_failing_discovery(mut self) -> Self {
        self.discovery = None;
        self
    }
}

#[async_trait]
impl PresenceProbe for ScriptedProbe {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn is_reachable(&mut self, address: &str) -> Result<bool, ProbeError> {
        self.probed.push(address.to_string());
        if self.failing.contains(address) {
            return Err(ProbeError::CommandFailed {
                command: "name".to_string(),
                message: "adapter busy".to_string(),
            });
        }
        Ok(self.reachable.contains(address))
    }

    async fn discover(&mut self) -> Result<Vec<DeviceRecord>, ProbeError> {
        self.discover_calls += 1;
        self.discovery.clone().ok_or_else(|| ProbeError::CommandFailed {
            command: "scan".to_string(),
            message: "inquiry failed".to_string(),
        })
    }
}

/// Catalog source returning a fixed list, or failing.
pub struct StaticCatalogSource {
    pub fetches: usize,
    records: Option<Vec<DeviceRecord>>,
}

impl StaticCatalogSource {
    pub fn with_devices(identifiers: &[&str]) -> Self {
        Self {
            fetches: 0,
            records: Some(identifiers.iter().map(|i| DeviceRecord::unnamed(*i)).collect()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fetches: 0,
            records: None,
        }
    }

    pub fn set_devices(&mut self, identifiers: &[&str]) {
        self.records = Some(identifiers.iter().map(|i| DeviceRecord::unnamed(*i)).collect());
    }

    pub fn set_failing(&mut self) {
        self.records = None;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch(&mut self) -> Result<Vec<DeviceRecord>, CatalogError> {
        self.fetches += 1;
        match &self.records {
            Some(records) => Ok(records.clone()),
            None => Err(CatalogError::InvalidUrl {
                url: "catalog".to_string(),
                message: "unreachable".to_string(),
            }),
        }
    }
}
