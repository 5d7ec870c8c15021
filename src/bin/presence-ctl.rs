//! Operator tool for presence sensors.
//!
//! Usage:
//!   cargo run --bin presence-ctl -- refresh
//!   cargo run --bin presence-ctl -- scan --sensor lobby
//!   cargo run --bin presence-ctl -- watch

use clap::{Parser, Subcommand};
use log::{info, warn};
use presence_sensor::bus::NO_CONTENT;
use presence_sensor::config::{self, Config, MqttConfig};
use presence_sensor::topics::{FETCH_DEVICE_DATABASE, SCAN_BLUETOOTH, Topics};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "presence-ctl")]
#[command(about = "Send commands to presence sensors and watch their reports")]
struct Cli {
    /// Environment file with broker settings
    #[arg(long, default_value = config::DEFAULT_ENV_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask every sensor to reload its device catalog
    Refresh,
    /// Ask sensors to scan for nearby devices
    Scan {
        /// Only this sensor scans
        #[arg(long)]
        sensor: Option<String>,
    },
    /// Print sensor reports as they arrive
    Watch {
        /// Only reports from this sensor
        #[arg(long)]
        sensor: Option<String>,
    },
}

fn connect(mqtt: &MqttConfig) -> (AsyncClient, EventLoop) {
    let client_id = format!("presence-ctl-{}", uuid::Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &mqtt.broker_host, mqtt.broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&mqtt.username, &mqtt.password) {
        options.set_credentials(user, pass);
    }
    AsyncClient::new(options, 10)
}

/// Publish a single command and wait until it has left the client.
async fn send_command(mqtt: &MqttConfig, topic: &str) -> Result<(), rumqttc::ConnectionError> {
    let (client, mut event_loop) = connect(mqtt);
    if let Err(e) = client.try_publish(topic, QoS::AtMostOnce, false, NO_CONTENT.as_bytes()) {
        warn!("Failed to queue {}: {}", topic, e);
        return Ok(());
    }

    loop {
        match event_loop.poll().await? {
            Event::Outgoing(Outgoing::Publish(_)) => {
                info!("Sent {}", topic);
                break;
            }
            Event::Incoming(Packet::ConnAck(_)) => info!("Connected to broker"),
            _ => {}
        }
    }

    // Flush the disconnect before dropping the loop
    let _ = client.try_disconnect();
    loop {
        match event_loop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Ok(())
}

async fn watch(mqtt: &MqttConfig, sensor: Option<&str>) -> Result<(), rumqttc::ConnectionError> {
    let (client, mut event_loop) = connect(mqtt);
    let filter = format!("sensor/{}/bluetooth/#", sensor.unwrap_or("+"));
    if let Err(e) = client.try_subscribe(&filter, QoS::AtMostOnce) {
        warn!("Failed to subscribe to {}: {}", filter, e);
        return Ok(());
    }
    info!("Watching {} (Ctrl+C to exit)", filter);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = event_loop.poll() => {
                if let Event::Incoming(Packet::Publish(publish)) = event? {
                    println!(
                        "{} {} {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        publish.topic,
                        String::from_utf8_lossy(&publish.payload)
                    );
                }
            }
        }
    }

    let _ = client.try_disconnect();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    config::load_dotenv(&cli.config);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    info!(
        "Using MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let result = match &cli.command {
        Commands::Refresh => send_command(&config.mqtt, FETCH_DEVICE_DATABASE).await,
        Commands::Scan { sensor } => {
            let topic = match sensor {
                Some(id) => Topics::new(id.as_str()).scan_command(),
                None => SCAN_BLUETOOTH.to_string(),
            };
            send_command(&config.mqtt, &topic).await
        }
        Commands::Watch { sensor } => watch(&config.mqtt, sensor.as_deref()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("MQTT connection failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
