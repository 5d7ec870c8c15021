//! Remote device catalog source.
//!
//! The catalog server answers with a JSON array of connection descriptions;
//! every element with `"type": "bluetooth"` names one device to poll through
//! its `identifier` field.

use super::DeviceRecord;
use crate::config::CatalogConfig;
use crate::error::CatalogError;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Url;
use serde::Deserialize;

const BLUETOOTH_TYPE: &str = "bluetooth";

/// Where the sensor gets its device list from.
#[async_trait]
pub trait CatalogSource: Send {
    /// Fetch and decode the current device list.
    async fn fetch(&mut self) -> Result<Vec<DeviceRecord>, CatalogError>;
}

/// Catalog source backed by an HTTP(S) endpoint.
pub struct HttpCatalogSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalogSource {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.fetch_url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the raw catalog body.
    pub async fn fetch_raw(&self) -> Result<Vec<u8>, CatalogError> {
        let url = normalize_url(&self.url)?;
        debug!("[Catalog] GET {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&mut self) -> Result<Vec<DeviceRecord>, CatalogError> {
        let body = self.fetch_raw().await?;
        parse_device_records(&body)
    }
}

/// Accept scheme-less addresses such as `localhost:8181/api/connection`.
fn normalize_url(raw: &str) -> Result<Url, CatalogError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    Url::parse(&candidate).map_err(|e| CatalogError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

/// Decode a catalog body into device records.
///
/// The body must be a JSON array. Elements of other types are skipped, as are
/// malformed elements and Bluetooth entries without an identifier. No
/// matching element yields an empty list.
pub fn parse_device_records(body: &[u8]) -> Result<Vec<DeviceRecord>, CatalogError> {
    let elements: Vec<serde_json::Value> = serde_json::from_slice(body)?;

    let mut records = Vec::new();
    for element in elements {
        let entry = match serde_json::from_value::<CatalogEntry>(element) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[Catalog] Skipping malformed entry: {}", e);
                continue;
            }
        };

        if entry.kind.as_deref() != Some(BLUETOOTH_TYPE) {
            continue;
        }

        match entry.identifier {
            Some(identifier) if !identifier.trim().is_empty() => {
                records.push(DeviceRecord::unnamed(identifier.trim()));
            }
            _ => warn!("[Catalog] Skipping bluetooth entry without identifier"),
        }
    }

    Ok(records)
}
