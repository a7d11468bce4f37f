//! # Configuration Module
//!
//! Handles loading and validating the system configuration from TOML files.
//!
//! The file describes the data link, the live display, one block per
//! calibrated channel and an ordered list of marker classification rules.
//! Channel blocks are only checked for shape here; the calibration engine
//! builds (and further validates) the per-channel models from them, see
//! [`ChannelConfigSet::from_config`].

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::calibration::ChannelConfigSet;
use crate::error::{DaqError, Result};
use crate::protocol::ChannelIdEncoding;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data_link: DataLinkConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    /// Calibration blocks keyed by channel id (`lc1`, `pw2`, `tm3`, ...).
    #[serde(default)]
    pub channel: BTreeMap<String, ChannelSection>,

    /// Marker classification rules, in match order.
    #[serde(default)]
    pub marker: Vec<MarkerSection>,
}

/// Device link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DataLinkConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub channel_id_encoding: ChannelIdEncoding,
}

/// Live display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,

    #[serde(default = "default_max_points")]
    pub max_points: usize,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

/// A single `[channel.<id>]` block.
///
/// Which fields are required depends on the channel family, which is derived
/// from the id prefix.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    /// Plot color, unused by the pipeline.
    pub color: Option<String>,

    // Load cell.
    pub adc_offset: Option<i64>,
    pub scale: Option<f64>,

    // Power.
    pub voltage_offset: Option<i64>,
    pub voltage_scale: Option<f64>,
    pub current_offset: Option<i64>,
    pub current_scale: Option<f64>,

    // Temperature.
    pub adc: Option<AdcSection>,
    pub thermistor: Option<ThermistorSection>,
    pub rtd: Option<RtdSection>,
}

/// Reference ADC readings of a temperature input.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct AdcSection {
    /// Reading with the input open.
    pub open: i64,
    /// Reading with the input shorted.
    pub short: i64,
    /// Reading with the calibration resistor connected.
    pub calib: i64,
    /// Calibration resistor value in ohms.
    pub calib_r: f64,
}

/// Steinhart-Hart thermistor parameters.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct ThermistorSection {
    pub beta: f64,
    pub c: f64,
    pub ref_r: f64,
    pub ref_c: f64,
    #[serde(default)]
    pub wire_r: f64,
    #[serde(default)]
    pub offset: f64,
}

/// RTD parameters.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct RtdSection {
    /// Nominal resistance at 0°C.
    pub r0: f64,
    /// Wire resistance in ohms.
    #[serde(default)]
    pub adjustment: f64,
    #[serde(default)]
    pub offset: f64,
}

/// A single `[[marker]]` classification rule.
#[derive(Debug, Deserialize, Clone)]
pub struct MarkerSection {
    #[serde(rename = "type")]
    pub marker_type: String,

    /// Matched case-insensitively against the start of the marker string.
    pub regex: String,

    /// Capture group that supplies the marker value, 0 for none.
    #[serde(default)]
    pub value_group: usize,

    /// Display styling, ignored by the pipeline.
    #[serde(default)]
    pub pen: Option<toml::Table>,
}

// Default value functions
fn default_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_read_timeout_ms() -> u64 { 100 }

fn default_window_secs() -> f64 { 10.0 }
fn default_max_points() -> usize { 50_000 }
fn default_report_interval_ms() -> u64 { 1000 }

/// Baud rates accepted for the data link.
const VALID_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1_000_000, 2_000_000, 3_000_000];

impl Default for DataLinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            channel_id_encoding: ChannelIdEncoding::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_points: default_max_points(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use daq_telemetry::config::Config;
    ///
    /// let config = Config::load("config/sys_config.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Channel and marker blocks are validated by building the calibration
    /// set from them.
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.data_link.port.is_empty() {
            return Err(DaqError::config("data_link port cannot be empty"));
        }

        if !VALID_BAUD_RATES.contains(&self.data_link.baud_rate) {
            return Err(DaqError::config(format!(
                "baud_rate {} is not one of: {:?}",
                self.data_link.baud_rate, VALID_BAUD_RATES
            )));
        }

        if self.data_link.reconnect_interval_ms == 0 || self.data_link.reconnect_interval_ms > 60000 {
            return Err(DaqError::config("reconnect_interval_ms must be between 1 and 60000"));
        }

        if self.data_link.read_timeout_ms == 0 || self.data_link.read_timeout_ms > 10000 {
            return Err(DaqError::config("read_timeout_ms must be between 1 and 10000"));
        }

        if !(self.display.window_secs > 0.0 && self.display.window_secs <= 3600.0) {
            return Err(DaqError::config("display window_secs must be in (0, 3600]"));
        }

        if self.display.max_points == 0 {
            return Err(DaqError::config("display max_points must be greater than 0"));
        }

        if self.display.report_interval_ms == 0 || self.display.report_interval_ms > 60000 {
            return Err(DaqError::config("report_interval_ms must be between 1 and 60000"));
        }

        ChannelConfigSet::from_config(self)?;

        Ok(())
    }
}
