//! Round-robin presence polling.

use crate::bus::{BusClient, Transport};
use crate::catalog::DeviceCatalog;
use crate::probe::PresenceProbe;
use crate::topics::Topics;
use log::{info, warn};

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub identifier: String,
    pub available: bool,
}

/// Cursor walking the catalog one device per tick.
#[derive(Debug, Default)]
pub struct PollScheduler {
    cursor: usize,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Probe the device under the cursor and publish its availability.
    ///
    /// Does nothing on an empty catalog. A probe that cannot be queried counts
    /// as unavailable.
    pub async fn poll_once<P, T>(
        &mut self,
        catalog: &DeviceCatalog,
        probe: &mut P,
        bus: &mut BusClient<T>,
        topics: &Topics,
    ) -> Option<PollOutcome>
    where
        P: PresenceProbe + ?Sized,
        T: Transport,
    {
        if catalog.is_empty() {
            self.cursor = 0;
            return None;
        }
        // The catalog may have shrunk since the last tick
        if self.cursor >= catalog.len() {
            self.cursor = 0;
        }

        let identifier = catalog.get(self.cursor)?.to_string();

        let available = match probe.is_reachable(&identifier).await {
            Ok(available) => available,
            Err(e) => {
                warn!("[Poll] Could not query {}: {}", identifier, e);
                false
            }
        };

        let topic = if available {
            info!("[Poll] Checking device {}... AVAILABLE", identifier);
            topics.available()
        } else {
            info!("[Poll] Checking device {}... unavailable", identifier);
            topics.unavailable()
        };

        if let Err(e) = bus.publish(&topic, identifier.as_bytes()) {
            warn!("[Poll] Publishing state of {} failed: {}", identifier, e);
        }
        bus.service_tick().await;

        self.cursor = (self.cursor + 1) % catalog.len();

        Some(PollOutcome {
            identifier,
            available,
        })
    }
}
