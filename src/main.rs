//! # DAQ Telemetry
//!
//! Command line front end of the telemetry pipeline.
//!
//! # Commands
//!
//! - `export`: convert a recorded byte stream into CSV files
//! - `monitor`: follow the live device stream, logging display status
//! - `calibrate`: print the calibration of a single raw reading
//!
//! # Examples
//!
//! ```bash
//! daq-telemetry export --config config/sys_config.toml --input session.bin --output-dir out
//! daq-telemetry monitor --port /dev/ttyUSB0
//! daq-telemetry calibrate --channel tm1 --adc 4000000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use daq_telemetry::calibration::ChannelConfigSet;
use daq_telemetry::config::Config;
use daq_telemetry::export::export_file;
use daq_telemetry::monitor::{Connector, FileConnector, LiveMonitor, SerialConnector};

/// Default configuration file
const DEFAULT_CONFIG_PATH: &str = "config/sys_config.toml";

/// Log file name prefix in `--log-dir`
const LOG_FILE_PREFIX: &str = "daq-telemetry.log";

#[derive(Debug, Parser)]
#[command(name = "daq-telemetry", version, about = "Decode, calibrate and record DAQ telemetry")]
struct Cli {
    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a recording into CSV files
    Export {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Recorded byte stream
        #[arg(long)]
        input: PathBuf,

        /// Existing directory for the output files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Write the run summary as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// Monitor the live device stream
    Monitor {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Serial port, overrides `data_link.port`
        #[arg(long)]
        port: Option<String>,

        /// Replay a recording instead of reading the device
        #[arg(long, conflicts_with = "port")]
        replay: Option<PathBuf>,
    },

    /// Print the calibration of one raw reading
    Calibrate {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(long)]
        channel: String,

        /// Raw reading (voltage reading for power channels)
        #[arg(long, allow_negative_numbers = true)]
        adc: i32,

        /// Current reading of a power channel
        #[arg(long, allow_negative_numbers = true)]
        current_adc: Option<i32>,
    },
}

/// Initialize logging to stderr and, optionally, rolling files.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the program.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn run_export(config: &Path, input: &Path, output_dir: &Path, summary_json: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let summary = export_file(&config, input, output_dir)
        .with_context(|| format!("Failed to export {}", input.display()))?;
    summary.log();
    if let Some(path) = summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
    }
    info!("All done.");
    Ok(())
}

async fn run_monitor(config: &Path, port: Option<String>, replay: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(port) = port {
        config.data_link.port = port;
    }
    let channels = Arc::new(ChannelConfigSet::from_config(&config)?);

    let mut connector: Box<dyn Connector> = match replay {
        Some(path) => Box::new(FileConnector::new(path)),
        None => Box::new(SerialConnector::from_config(&config.data_link)),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut monitor = LiveMonitor::from_config(&config, channels);
    info!("Press Ctrl+C to exit");
    monitor.run(connector.as_mut(), shutdown_rx).await?;
    Ok(())
}

fn run_calibrate(config: &Path, channel: &str, adc: i32, current_adc: Option<i32>) -> Result<()> {
    let config = load_config(config)?;
    let channels = ChannelConfigSet::from_config(&config)?;
    let probe = channels.probe(channel, adc, current_adc)?;
    println!("{}: {}", channel, probe);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref());

    info!("DAQ Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Export {
            config,
            input,
            output_dir,
            summary_json,
        } => run_export(&config, &input, &output_dir, summary_json.as_deref()),
        Command::Monitor { config, port, replay } => run_monitor(&config, port, replay).await,
        Command::Calibrate {
            config,
            channel,
            adc,
            current_adc,
        } => run_calibrate(&config, &channel, adc, current_adc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from([
            "daq-telemetry",
            "export",
            "--input",
            "session.bin",
            "--output-dir",
            "out",
            "--summary-json",
            "summary.json",
            "--log-dir",
            "logs",
        ])
        .unwrap();

        assert_eq!(cli.log_dir, Some(PathBuf::from("logs")));
        match cli.command {
            Command::Export {
                config,
                input,
                output_dir,
                summary_json,
            } => {
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_PATH));
                assert_eq!(input, PathBuf::from("session.bin"));
                assert_eq!(output_dir, PathBuf::from("out"));
                assert_eq!(summary_json, Some(PathBuf::from("summary.json")));
            }
            other => panic!("Expected export, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_calibrate_negative_adc() {
        let cli = Cli::try_parse_from([
            "daq-telemetry",
            "calibrate",
            "--channel",
            "pw1",
            "--adc",
            "-12",
            "--current-adc",
            "40",
        ])
        .unwrap();

        match cli.command {
            Command::Calibrate {
                channel,
                adc,
                current_adc,
                ..
            } => {
                assert_eq!(channel, "pw1");
                assert_eq!(adc, -12);
                assert_eq!(current_adc, Some(40));
            }
            other => panic!("Expected calibrate, got: {:?}", other),
        }
    }

    #[test]
    fn test_monitor_port_conflicts_with_replay() {
        let result = Cli::try_parse_from([
            "daq-telemetry",
            "monitor",
            "--port",
            "/dev/ttyUSB0",
            "--replay",
            "session.bin",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_export_requires_input() {
        assert!(Cli::try_parse_from(["daq-telemetry", "export"]).is_err());
    }
}
