//! Presence sensor run loop.
//!
//! [`PresenceSensor`] owns the bus connection, the probe, the catalog source
//! and the catalog, and drives them from a single control loop:
//!
//! 1. refresh the catalog if it is stale,
//! 2. poll one device,
//! 3. drain and act on commands until none are left,
//! 4. recover the broker connection if it dropped.
//!
//! Every wait inside the loop races the cancellation token, so a stop request
//! is honored as soon as the current poll or publish finishes.

use crate::bus::{BusClient, Transport};
use crate::catalog::{CatalogSource, DeviceCatalog};
use crate::commands::CommandTally;
use crate::discovery;
use crate::error::{Result, SensorError};
use crate::probe::PresenceProbe;
use crate::scheduler::PollScheduler;
use crate::topics::Topics;
use log::{error, info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause taken in place of a poll while the catalog is empty.
const IDLE_PAUSE: Duration = Duration::from_secs(1);

/// Runtime settings of the sensor.
#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub sensor_id: String,
    /// Pause between connection attempts after the first retry
    pub connect_attempt_interval: Duration,
}

/// The presence sensor and everything it owns.
pub struct PresenceSensor<T, P, S>
where
    T: Transport,
    P: PresenceProbe,
    S: CatalogSource,
{
    bus: BusClient<T>,
    probe: P,
    source: S,
    catalog: DeviceCatalog,
    scheduler: PollScheduler,
    topics: Topics,
    connect_attempt_interval: Duration,
    catalog_stale: bool,
    cancel: CancellationToken,
}

impl<T, P, S> PresenceSensor<T, P, S>
where
    T: Transport,
    P: PresenceProbe,
    S: CatalogSource,
{
    pub fn new(
        bus: BusClient<T>,
        probe: P,
        source: S,
        settings: SensorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            probe,
            source,
            catalog: DeviceCatalog::new(),
            scheduler: PollScheduler::new(),
            topics: Topics::new(settings.sensor_id),
            connect_attempt_interval: settings.connect_attempt_interval,
            catalog_stale: true,
            cancel,
        }
    }

    pub fn bus(&self) -> &BusClient<T> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BusClient<T> {
        &mut self.bus
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn is_catalog_stale(&self) -> bool {
        self.catalog_stale
    }

    pub fn sensor_id(&self) -> &str {
        self.topics.sensor_id()
    }

    /// Connect, subscribe to commands, load the catalog and say hello.
    ///
    /// Connection timeouts are retried until cancelled. A failed catalog load
    /// only marks the catalog stale.
    pub async fn start(&mut self) -> Result<()> {
        info!("[Sensor] Connecting to broker...");
        if let Err(e) = self.bus.connect(&self.cancel).await {
            error!("[Sensor] {}", e);
            if !self.connect_with_retry(false).await {
                return Err(SensorError::Cancelled);
            }
        }

        for topic in self.topics.command_topics() {
            self.bus
                .subscribe(&topic)
                .map_err(|source| SensorError::Subscribe { topic, source })?;
        }

        self.refresh_catalog().await;
        self.send_hello().await;

        info!("[Sensor] Sensor ID: {}", self.sensor_id());
        Ok(())
    }

    /// Run cycles until the cancellation token fires.
    pub async fn run(&mut self) {
        info!("[Sensor] Running, CTRL+C to quit...");
        while !self.cancel.is_cancelled() {
            self.run_cycle().await;
        }
        info!("[Sensor] Run loop stopped");
    }

    /// One pass of the control loop.
    pub async fn run_cycle(&mut self) {
        if self.catalog_stale {
            self.refresh_catalog().await;
        }

        let polled = self
            .scheduler
            .poll_once(&self.catalog, &mut self.probe, &mut self.bus, &self.topics)
            .await;
        if polled.is_none() {
            self.pause(IDLE_PAUSE).await;
        }

        self.process_commands().await;

        if !self.bus.is_connected() && !self.cancel.is_cancelled() {
            error!("[Sensor] Broker disconnected");
            if self.connect_with_retry(true).await {
                self.catalog_stale = true;
                self.send_hello().await;
            }
        }
    }

    /// Drain commands and act on them until a drain requests nothing.
    ///
    /// Commands that arrive while a refresh or scan is running are picked up
    /// by the next drain.
    async fn process_commands(&mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let messages = self.bus.drain_inbound().await;
            let tally = CommandTally::from_messages(&messages);
            if tally.is_empty() {
                return;
            }

            if tally.refresh_requested {
                self.refresh_catalog().await;
            }
            if tally.discovery_requested {
                discovery::discover(&mut self.probe, &mut self.bus, &self.topics).await;
            }
        }
    }

    /// Fetch the catalog. On failure the previous catalog is kept and the
    /// catalog stays stale.
    async fn refresh_catalog(&mut self) -> bool {
        info!("[Catalog] Fetching device database...");

        match self.source.fetch().await {
            Ok(records) => {
                self.catalog.replace(records);
                if self.catalog.is_empty() {
                    info!("[Catalog] No devices");
                } else {
                    info!("[Catalog] Devices: {}", self.catalog.identifiers().join(", "));
                }
                self.catalog_stale = false;
                true
            }
            Err(e) => {
                error!("[Catalog] {}", e);
                self.catalog_stale = true;
                false
            }
        }
    }

    async fn send_hello(&mut self) {
        if let Err(e) = self.bus.publish(&self.topics.hello(), b"") {
            warn!("[Sensor] Sending hello failed: {}", e);
        }
        self.bus.service_tick().await;
    }

    /// Retry the broker connection until it succeeds or the sensor is
    /// cancelled. With `immediate`, the first attempt happens without waiting.
    ///
    /// Returns `false` when cancelled.
    async fn connect_with_retry(&mut self, immediate: bool) -> bool {
        let verb = if immediate { "Reconnecting" } else { "Connecting" };
        let mut attempt = 1;

        if immediate {
            info!("[Sensor] {} to broker, attempt #{}...", verb, attempt);
            match self.bus.reconnect(&self.cancel).await {
                Ok(()) => {
                    info!("[Sensor] Broker reconnected");
                    return true;
                }
                Err(e) => error!("[Sensor] {}", e),
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            if !self.connect_attempt_interval.is_zero() {
                info!(
                    "[Sensor] Waiting connect attempt interval ({}s)...",
                    self.connect_attempt_interval.as_secs()
                );
                if !self.pause(self.connect_attempt_interval).await {
                    return false;
                }
            }

            attempt += 1;
            info!("[Sensor] {} to broker, attempt #{}...", verb, attempt);
            match self.bus.reconnect(&self.cancel).await {
                Ok(()) => {
                    let outcome = if immediate { "reconnected" } else { "connected" };
                    info!("[Sensor] Broker {}", outcome);
                    return true;
                }
                Err(e) => error!("[Sensor] {}", e),
            }
        }
    }

    /// Sleep for `duration`. Returns `false` if cancelled meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    /// Tear down the broker connection.
    pub async fn shutdown(&mut self) {
        self.bus.shutdown().await;
    }
}
