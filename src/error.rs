use thiserror::Error as ThisError;

use crate::instance_lock::InstanceLockError;

/// Failures of the publish/subscribe connection.
#[derive(ThisError, Debug)]
pub enum BusError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("No connection acknowledgment within {0}s")]
    ConnectTimeout(u64),

    #[error("Cannot connect to broker: {0}")]
    ConnectFailed(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Transport rejected request: {0}")]
    Transport(String),
}

/// Failures of the Bluetooth presence probe.
#[derive(ThisError, Debug)]
pub enum ProbeError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Bluetooth adapter {0} not found")]
    AdapterNotFound(String),

    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the device catalog fetch and decode.
#[derive(ThisError, Debug)]
pub enum CatalogError {
    #[error("Invalid catalog URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse device data: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that stop the sensor before it enters its run loop.
#[derive(ThisError, Debug)]
pub enum SensorError {
    #[error("Bluetooth initialization failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Broker connection failed: {0}")]
    Bus(#[from] BusError),

    #[error("Catalog source initialization failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    InstanceLock(#[from] InstanceLockError),

    #[error("Subscribing to {topic} failed: {source}")]
    Subscribe { topic: String, source: BusError },

    #[error("Startup cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SensorError>;
