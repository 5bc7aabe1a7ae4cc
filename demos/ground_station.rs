//! Ground station demo: listen on a serial XBee and print telemetry.
//!
//! ```text
//! cargo run --example ground_station -- [config.yaml] [--port /dev/ttyUSB0]
//! cargo run --example ground_station -- --list-ports
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use futures::StreamExt;
use groundlink::{
    GroundStation, GroundStationConfig, SerialXBeeLink, TrendSeries, default_sinks, list_ports,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[derive(Parser, Debug)]
#[command(name = "ground_station")]
#[command(about = "Listen for CanSat telemetry on a serial XBee")]
struct Args {
    /// YAML configuration file
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let ports = list_ports();
    if args.list_ports {
        for port in &ports {
            println!("{port}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => GroundStationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GroundStationConfig::default(),
    };
    if let Some(port) = args.port {
        config.link.port = port;
    }
    if config.link.port.is_empty() {
        match ports.first() {
            Some(port) => {
                info!("No port configured, using {}", port);
                config.link.port = port.clone();
            }
            None => bail!("no serial port configured and none detected"),
        }
    }

    let (sinks, display) = default_sinks(&config).context("creating sinks")?;
    let link = SerialXBeeLink::new(config.link.api_mode);
    let station = match GroundStation::connect(config, link, sinks).await {
        Ok(station) => station,
        Err(e) => {
            error!("{}", e);
            for suggestion in e.recovery_suggestions() {
                warn!("  - {}", suggestion);
            }
            return Err(e.into());
        }
    };

    let mut records = display.updates();
    let mut status = tokio::time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            Some(record) = records.next() => {
                info!(
                    "#{} {} alt={:.2} m temp={:.2} °C volt={:.2} V sats={}",
                    record.packet_count,
                    record.mission_time,
                    record.altitude,
                    record.temperature,
                    record.voltage,
                    record.gps_sats,
                );
            }
            _ = status.tick() => {
                let receiver = station.receiver_stats();
                let consumer = station.consumer_stats();
                let altitude = display.trends();
                let points = altitude.series(TrendSeries::Altitude).len();
                info!(
                    "{}: {} frames, {} faults, {} records, {} decode errors, {} trend points",
                    station.state(),
                    receiver.frames_received,
                    receiver.read_faults,
                    consumer.records_dispatched,
                    consumer.decode_errors,
                    points,
                );
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    let stats = station.shutdown().await;
    info!("Done: {} records logged", stats.records_dispatched);
    Ok(())
}
