//! Presence probe built on the BlueZ `hcitool` utility.

use super::{PresenceProbe, UNKNOWN_NAME};
use crate::catalog::DeviceRecord;
use crate::error::ProbeError;
use async_trait::async_trait;
use log::{debug, info};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

const HCITOOL: &str = "hcitool";

/// Upper bound for a single remote name request.
const NAME_TIMEOUT: Duration = Duration::from_secs(20);

/// Inquiry length in 1.28 s units.
const INQUIRY_LENGTH: u8 = 8;

/// Upper bound for an inquiry including name resolution.
const SCAN_TIMEOUT: Duration = Duration::from_secs(90);

/// Probe that shells out to `hcitool` on a fixed adapter.
pub struct HciToolProbe {
    device: String,
    address: String,
}

impl HciToolProbe {
    /// Locate the adapter (`device`, or the first one listed) and read its
    /// address.
    pub async fn init(device: Option<&str>) -> Result<Self, ProbeError> {
        let output = run(&["dev"], NAME_TIMEOUT).await?;
        let adapters = parse_adapters(&String::from_utf8_lossy(&output.stdout));

        let (device, address) = match device {
            Some(wanted) => adapters
                .into_iter()
                .find(|(name, _)| name == wanted)
                .ok_or_else(|| ProbeError::AdapterNotFound(wanted.to_string()))?,
            None => adapters.into_iter().next().ok_or(ProbeError::NoAdapter)?,
        };

        info!("[Probe] Using adapter {} ({})", device, address);
        Ok(Self { device, address })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

#[async_trait]
impl PresenceProbe for HciToolProbe {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn is_reachable(&mut self, address: &str) -> Result<bool, ProbeError> {
        if !is_valid_address(address) {
            debug!("[Probe] Not a Bluetooth address: {:?}", address);
            return Ok(false);
        }

        let output = run(&["-i", self.device.as_str(), "name", address], NAME_TIMEOUT).await?;
        let name = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && !name.trim().is_empty())
    }

    async fn discover(&mut self) -> Result<Vec<DeviceRecord>, ProbeError> {
        let length = format!("--length={}", INQUIRY_LENGTH);
        let output = run(
            &["-i", self.device.as_str(), "scan", "--flush", length.as_str()],
            SCAN_TIMEOUT,
        )
        .await?;

        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                command: format!("{} scan", HCITOOL),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_scan(&String::from_utf8_lossy(&output.stdout)))
    }
}

async fn run(args: &[&str], limit: Duration) -> Result<Output, ProbeError> {
    let mut command = Command::new(HCITOOL);
    command.args(args).kill_on_drop(true);

    match tokio::time::timeout(limit, command.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ProbeError::Timeout {
            command: format!("{} {}", HCITOOL, args.join(" ")),
            secs: limit.as_secs(),
        }),
    }
}

/// Parse `hcitool dev` output into `(adapter, address)` pairs.
fn parse_adapters(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let address = fields.next()?;
            is_valid_address(address).then(|| (name.to_string(), address.to_string()))
        })
        .collect()
}

/// Parse `hcitool scan` output. Lines look like `\t<address>\t<name>`.
fn parse_scan(output: &str) -> Vec<DeviceRecord> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (address, name) = match line.split_once(char::is_whitespace) {
                Some((address, name)) => (address, name.trim()),
                None => (line, ""),
            };
            if !is_valid_address(address) {
                return None;
            }
            let name = if name.is_empty() || name == "n/a" {
                UNKNOWN_NAME
            } else {
                name
            };
            Some(DeviceRecord::new(address, name))
        })
        .collect()
}

/// `XX:XX:XX:XX:XX:XX` with hexadecimal digits.
fn is_valid_address(address: &str) -> bool {
    let parts: Vec<&str> = address.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
