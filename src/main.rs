use clap::Parser;
use log::{error, info};
use presence_sensor::bus::{BusClient, MqttTransport};
use presence_sensor::catalog::HttpCatalogSource;
use presence_sensor::config::{self, Config};
use presence_sensor::error::Result;
use presence_sensor::instance_lock::InstanceLock;
use presence_sensor::probe::{HciToolProbe, PresenceProbe};
use presence_sensor::sensor::{PresenceSensor, SensorSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Keys of the older `config.ini` and the variables that replace them.
const CONFIG_KEYS_HELP: &str = "\
Settings are read from the environment file and the process environment.
config.ini is not read; its keys map to these variables:
  broker_address            BROKER_ADDRESS
  broker_port               BROKER_PORT
  data_fetch_url            DATA_FETCH_URL
  connect_attempt_interval  CONNECT_ATTEMPT_INTERVAL
  sensor_id                 SENSOR_ID
Further variables: MQTT_USERNAME, MQTT_PASSWORD, CONNECT_TIMEOUT, FETCH_TIMEOUT, HCI_DEVICE";

#[derive(Parser)]
#[command(name = "presence-sensor")]
#[command(about = "Reports nearby Bluetooth devices over MQTT")]
#[command(after_help = CONFIG_KEYS_HELP)]
struct Cli {
    /// Environment file with sensor settings
    #[arg(default_value = config::DEFAULT_ENV_FILE)]
    config: PathBuf,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                    return;
                }
            }
            () = terminate => {}
        }

        info!(" *** QUITTING... *** ");
        cancel.cancel();
    });
}

async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    info!("Initializing Bluetooth...");
    let probe = HciToolProbe::init(config.sensor.hci_device.as_deref()).await?;
    let sensor_id = config.sensor.resolve_sensor_id(probe.local_address());

    let _lock = InstanceLock::acquire(&sensor_id)?;

    info!("Initializing catalog source ({})...", config.catalog.fetch_url);
    let source = HttpCatalogSource::new(&config.catalog)?;

    info!(
        "Initializing MQTT ({}:{})...",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let transport = MqttTransport::new(&config.mqtt, &sensor_id);
    let bus = BusClient::new(transport, config.mqtt.connect_timeout());

    let settings = SensorSettings {
        sensor_id,
        connect_attempt_interval: config.sensor.connect_attempt_interval(),
    };
    let mut sensor = PresenceSensor::new(bus, probe, source, settings, cancel);

    let result = sensor.start().await;
    if result.is_ok() {
        sensor.run().await;
    }
    sensor.shutdown().await;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load the environment file before anything reads the environment
    let applied = config::load_dotenv(&cli.config);

    init_logger();
    info!("Starting presence sensor");

    match applied {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!(
            "Cannot read {}, using environment and default values",
            cli.config.display()
        ),
    }
    let config = Config::from_env();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match run(config, cancel).await {
        Ok(()) => {
            info!("Presence sensor stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
