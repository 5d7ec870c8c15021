//! Discovery scan and result reporting.

use crate::bus::{BusClient, Transport};
use crate::probe::PresenceProbe;
use crate::topics::Topics;
use log::{error, info, warn};
use serde::Serialize;

/// Payload of a `new_device` message.
#[derive(Debug, Serialize)]
struct NewDevice<'a> {
    name: &'a str,
    mac: &'a str,
}

/// Scan for nearby devices, publish each one, then publish the completion
/// marker. The marker is sent even when the scan fails.
///
/// Returns the number of devices reported.
pub async fn discover<P, T>(probe: &mut P, bus: &mut BusClient<T>, topics: &Topics) -> usize
where
    P: PresenceProbe + ?Sized,
    T: Transport,
{
    info!("[Scan] Discovering devices...");

    let reported = match probe.discover().await {
        Ok(devices) => {
            if devices.is_empty() {
                info!("[Scan] No devices found");
            } else {
                info!("[Scan] Found {} device(s)", devices.len());
            }

            let topic = topics.new_device();
            for device in &devices {
                info!("[Scan]   {} {}", device.identifier, device.display_name);

                let payload = NewDevice {
                    name: &device.display_name,
                    mac: &device.identifier,
                };
                match serde_json::to_vec(&payload) {
                    Ok(body) => {
                        if let Err(e) = bus.publish(&topic, &body) {
                            warn!("[Scan] Publishing {} failed: {}", device.identifier, e);
                        }
                    }
                    Err(e) => error!("[Scan] Encoding {} failed: {}", device.identifier, e),
                }
                bus.service_tick().await;
            }
            devices.len()
        }
        Err(e) => {
            error!("[Scan] Discovery failed: {}", e);
            0
        }
    };

    if let Err(e) = bus.publish(&topics.scan_complete(), b"") {
        warn!("[Scan] Publishing scan completion failed: {}", e);
    }
    bus.service_tick().await;

    reported
}
