//! Device catalog: the identifiers currently polled for presence.
//!
//! The catalog is filled from a remote source (see [`source`]) and replaced
//! wholesale on every successful refresh.

mod source;

pub use source::{CatalogSource, HttpCatalogSource, parse_device_records};

/// A known Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Transport address, e.g. `00:1A:7D:DA:71:13`
    pub identifier: String,
    /// Human readable name, empty if unknown
    pub display_name: String,
}

impl DeviceRecord {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
        }
    }

    /// Record without a known name.
    pub fn unnamed(identifier: impl Into<String>) -> Self {
        Self::new(identifier, String::new())
    }
}

/// Ordered list of device identifiers to poll.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    identifiers: Vec<String>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new device list, keeping the given order.
    ///
    /// The new list is built completely before it replaces the old one.
    /// An empty list is valid and suspends polling.
    pub fn replace<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = DeviceRecord>,
    {
        let identifiers: Vec<String> = records.into_iter().map(|r| r.identifier).collect();
        self.identifiers = identifiers;
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.identifiers.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
