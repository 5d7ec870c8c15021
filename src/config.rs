use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the environment file next to the working directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Load environment variables from a dotenv-style file.
/// Handles values with spaces without requiring quotes.
///
/// Falls back to `<config dir>/presence-sensor/sensor.env` when `path` does
/// not exist. Returns the file that was applied, if any.
pub fn load_dotenv(path: &Path) -> Option<PathBuf> {
    let candidate = if path.exists() {
        path.to_path_buf()
    } else {
        let fallback = dirs::config_dir()?.join("presence-sensor").join("sensor.env");
        if !fallback.exists() {
            return None;
        }
        fallback
    };

    let content = fs::read_to_string(&candidate).ok()?;

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: called from main before the runtime spawns any task
            unsafe { std::env::set_var(key, value) };
        }
    }

    Some(candidate)
}

/// Parse `KEY=value` lines, skipping blanks and `#` comments.
fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            if !key.is_empty() {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub catalog: CatalogConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// How long a connection acknowledgment is waited for, in seconds
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub fetch_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Explicit sensor identity; derived from the adapter address when unset
    pub sensor_id: Option<String>,
    /// Pause between broker connection attempts, in seconds
    pub connect_attempt_interval_secs: u64,
    /// HCI adapter name such as `hci0`; first adapter when unset
    pub hci_device: Option<String>,
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl CatalogConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SensorConfig {
    pub fn connect_attempt_interval(&self) -> Duration {
        Duration::from_secs(self.connect_attempt_interval_secs)
    }

    /// Sensor identity used in topics and as the MQTT client id.
    pub fn resolve_sensor_id(&self, adapter_address: &str) -> String {
        match &self.sensor_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("bt-sensor_{}", adapter_address),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                username: None,
                password: None,
                connect_timeout_secs: 5,
            },
            catalog: CatalogConfig {
                fetch_url: "localhost:8181/api/connection".to_string(),
                request_timeout_secs: 10,
            },
            sensor: SensorConfig {
                sensor_id: None,
                connect_attempt_interval_secs: 5,
                hci_device: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Broker
        if let Some(host) = lookup("BROKER_ADDRESS") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("BROKER_PORT")
            && let Ok(p) = port.trim().parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(timeout) = lookup("CONNECT_TIMEOUT")
            && let Ok(t) = timeout.trim().parse()
        {
            config.mqtt.connect_timeout_secs = t;
        }

        // Catalog
        if let Some(url) = lookup("DATA_FETCH_URL") {
            config.catalog.fetch_url = url;
        }
        if let Some(timeout) = lookup("FETCH_TIMEOUT")
            && let Ok(t) = timeout.trim().parse()
        {
            config.catalog.request_timeout_secs = t;
        }

        // Sensor
        if let Some(interval) = lookup("CONNECT_ATTEMPT_INTERVAL")
            && let Ok(i) = interval.trim().parse()
        {
            config.sensor.connect_attempt_interval_secs = i;
        }
        if let Some(id) = lookup("SENSOR_ID") {
            config.sensor.sensor_id = Some(id);
        }
        if let Some(device) = lookup("HCI_DEVICE") {
            config.sensor.hci_device = Some(device);
        }

        config
    }
}
