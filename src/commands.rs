//! Inbound command classification.

use crate::bus::InboundMessage;
use crate::topics::{FETCH_DEVICE_DATABASE, SCAN_BLUETOOTH};
use log::info;
use strum::Display;

/// Commands the sensor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    FetchDeviceDatabase,
    ScanBluetooth,
}

impl Command {
    /// Map a topic to a command. Unknown topics are not an error.
    pub fn classify(topic: &str) -> Option<Self> {
        if topic == FETCH_DEVICE_DATABASE {
            Some(Command::FetchDeviceDatabase)
        } else if topic.starts_with(SCAN_BLUETOOTH) {
            Some(Command::ScanBluetooth)
        } else {
            None
        }
    }
}

/// Actions requested by one batch of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTally {
    pub refresh_requested: bool,
    pub discovery_requested: bool,
}

impl CommandTally {
    pub fn from_messages(messages: &[InboundMessage]) -> Self {
        let mut tally = Self::default();
        for message in messages {
            if let Some(command) = Command::classify(&message.topic) {
                info!("[Commands] {} requested on {}", command, message.topic);
                tally.record(command);
            }
        }
        tally
    }

    pub fn record(&mut self, command: Command) {
        match command {
            Command::FetchDeviceDatabase => self.refresh_requested = true,
            Command::ScanBluetooth => self.discovery_requested = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.refresh_requested && !self.discovery_requested
    }
}
