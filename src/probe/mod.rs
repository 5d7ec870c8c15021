//! Bluetooth presence probing.

mod hcitool;

pub use hcitool::HciToolProbe;

use crate::catalog::DeviceRecord;
use crate::error::ProbeError;
use async_trait::async_trait;

/// Name reported for a discovered device whose name could not be read.
pub const UNKNOWN_NAME: &str = "[unknown]";

/// Short-range wireless capability used by the sensor.
#[async_trait]
pub trait PresenceProbe: Send {
    /// Address of the local adapter.
    fn local_address(&self) -> &str;

    /// Check whether the device answers.
    ///
    /// `Ok(false)` means the device did not respond; `Err` means the query
    /// could not be made at all.
    async fn is_reachable(&mut self, address: &str) -> Result<bool, ProbeError>;

    /// Run an inquiry and resolve a name for every device found.
    ///
    /// Individual name lookups that fail yield [`UNKNOWN_NAME`].
    async fn discover(&mut self) -> Result<Vec<DeviceRecord>, ProbeError>;
}
