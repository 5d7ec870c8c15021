//! Bus topic names.

/// Request to refresh the device catalog.
pub const FETCH_DEVICE_DATABASE: &str = "command/fetch_device_database";

/// Request for a discovery scan; per-sensor requests append `/{sensor id}`.
pub const SCAN_BLUETOOTH: &str = "command/scan/bluetooth";

/// Outgoing topics of one sensor.
#[derive(Debug, Clone)]
pub struct Topics {
    sensor_id: String,
    base: String,
}

impl Topics {
    pub fn new(sensor_id: impl Into<String>) -> Self {
        let sensor_id = sensor_id.into();
        let base = format!("sensor/{}/bluetooth", sensor_id);
        Self { sensor_id, base }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn hello(&self) -> String {
        format!("{}/hello", self.base)
    }

    pub fn available(&self) -> String {
        format!("{}/available", self.base)
    }

    pub fn unavailable(&self) -> String {
        format!("{}/unavailable", self.base)
    }

    pub fn new_device(&self) -> String {
        format!("{}/new_device", self.base)
    }

    pub fn scan_complete(&self) -> String {
        format!("{}/scan_complete", self.base)
    }

    /// Scan request addressed to this sensor only.
    pub fn scan_command(&self) -> String {
        format!("{}/{}", SCAN_BLUETOOTH, self.sensor_id)
    }

    /// Command topics the sensor listens to.
    pub fn command_topics(&self) -> [String; 3] {
        [
            FETCH_DEVICE_DATABASE.to_string(),
            self.scan_command(),
            SCAN_BLUETOOTH.to_string(),
        ]
    }
}
