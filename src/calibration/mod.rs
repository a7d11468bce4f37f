//! # Calibration Module
//!
//! Converts raw ADC integers into physical units.
//!
//! ## Channel families
//!
//! - Load cell: `grams = (adc - offset) * scale`
//! - Power: linear volts and amps, rounded to 3 decimals
//! - Temperature: ADC to ohms through a series resistor divider, then ohms
//!   to °C through a [`Thermistor`] or [`Rtd`] model
//!
//! Markers are not calibrated but classified, see [`MarkerClassifier`].
//!
//! ## Usage
//!
//! The set is built once from the configuration and shared read-only:
//!
//! ```
//! use daq_telemetry::calibration::ChannelConfigSet;
//! use daq_telemetry::config::Config;
//!
//! let config = Config::from_toml_str(r#"
//! [data_link]
//! [channel.lc1]
//! adc_offset = 100
//! scale = 0.25
//! "#)?;
//! let set = ChannelConfigSet::from_config(&config)?;
//! assert_eq!(set.load_cell("lc1").unwrap().adc_reading_to_grams(104), 1.0);
//! assert!(!set.is_configured("lc2"));
//! # Ok::<(), daq_telemetry::error::DaqError>(())
//! ```
//!
//! All conversions are pure. A [`ChannelConfigSet`] is `Send + Sync` and may
//! be shared through an `Arc` by any number of readers.

pub mod load_cell;
pub mod markers;
pub mod power;
pub mod temperature;

pub use load_cell::LoadCellCalibration;
pub use markers::{MarkerClassifier, MarkerRule};
pub use power::PowerCalibration;
pub use temperature::{
    ResistanceToCelsius, Rtd, TemperatureCalibration, TemperatureModel, Thermistor, MAX_VALID_C,
    OPEN_CIRCUIT_C, OPEN_CIRCUIT_OHMS, PT1000_TABLE,
};

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::config::{ChannelSection, Config};
use crate::error::{DaqError, Result};
use crate::protocol::ChannelFamily;

/// Calibration of a single configured channel.
#[derive(Debug)]
pub enum ChannelCalibration {
    LoadCell(LoadCellCalibration),
    Power(PowerCalibration),
    Temperature(TemperatureCalibration),
}

impl ChannelCalibration {
    pub fn family(&self) -> ChannelFamily {
        match self {
            ChannelCalibration::LoadCell(_) => ChannelFamily::LoadCell,
            ChannelCalibration::Power(_) => ChannelFamily::Power,
            ChannelCalibration::Temperature(_) => ChannelFamily::Temperature,
        }
    }
}

/// The (raw, intermediate, final) values of one conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationProbe {
    LoadCell {
        adc_reading: i32,
        grams: f64,
    },
    Power {
        adc_voltage: i16,
        adc_current: i16,
        volts: f64,
        amps: f64,
        watts: f64,
    },
    Temperature {
        adc_reading: i32,
        r_ohms: f64,
        t_celsius: f64,
    },
}

impl fmt::Display for CalibrationProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationProbe::LoadCell { adc_reading, grams } => {
                write!(f, "adc {} -> {:.3} g", adc_reading, grams)
            }
            CalibrationProbe::Power {
                adc_voltage,
                adc_current,
                volts,
                amps,
                watts,
            } => write!(
                f,
                "adc {} / {} -> {:.3} V, {:.3} A, {:.3} W",
                adc_voltage, adc_current, volts, amps, watts
            ),
            CalibrationProbe::Temperature {
                adc_reading,
                r_ohms,
                t_celsius,
            } => write!(f, "adc {} -> {:.2} R -> {:.3} C", adc_reading, r_ohms, t_celsius),
        }
    }
}

/// Immutable calibration for every configured channel plus the marker rules.
#[derive(Debug, Default)]
pub struct ChannelConfigSet {
    channels: BTreeMap<String, ChannelCalibration>,
    markers: MarkerClassifier,
}

impl ChannelConfigSet {
    /// Build the calibration set from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - A channel id is not a valid calibrated channel (`mrk` and `ext` are not)
    /// - A channel block misses a field of its family or carries a field of another
    /// - A temperature block has both or neither of `thermistor` and `rtd`
    /// - Any reference value is degenerate
    /// - A marker rule does not compile
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut channels = BTreeMap::new();
        for (id, section) in &config.channel {
            let calibration = build_channel(id, section)
                .map_err(|e| DaqError::config(format!("channel [{}]: {}", id, e)))?;
            debug!("Channel [{}] configured as {}", id, calibration.family().label());
            channels.insert(id.clone(), calibration);
        }

        let markers = MarkerClassifier::from_sections(&config.marker)?;

        Ok(Self { channels, markers })
    }

    /// Creates a set from prebuilt calibrations.
    pub fn new(channels: BTreeMap<String, ChannelCalibration>, markers: MarkerClassifier) -> Self {
        Self { channels, markers }
    }

    pub fn get(&self, channel_id: &str) -> Option<&ChannelCalibration> {
        self.channels.get(channel_id)
    }

    pub fn load_cell(&self, channel_id: &str) -> Option<&LoadCellCalibration> {
        match self.channels.get(channel_id)? {
            ChannelCalibration::LoadCell(c) => Some(c),
            _ => None,
        }
    }

    pub fn power(&self, channel_id: &str) -> Option<&PowerCalibration> {
        match self.channels.get(channel_id)? {
            ChannelCalibration::Power(c) => Some(c),
            _ => None,
        }
    }

    pub fn temperature(&self, channel_id: &str) -> Option<&TemperatureCalibration> {
        match self.channels.get(channel_id)? {
            ChannelCalibration::Temperature(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_configured(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn markers(&self) -> &MarkerClassifier {
        &self.markers
    }

    /// Configured channels in id order.
    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelCalibration)> {
        self.channels.iter().map(|(id, c)| (id.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Runs one conversion on a configured channel.
    ///
    /// For power channels `adc_reading` is the voltage reading and
    /// `current_adc` the current reading (defaults to `adc_reading`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the channel is not configured or a
    /// power reading does not fit 16 bits.
    pub fn probe(&self, channel_id: &str, adc_reading: i32, current_adc: Option<i32>) -> Result<CalibrationProbe> {
        let calibration = self
            .get(channel_id)
            .ok_or_else(|| DaqError::config(format!("channel [{}] is not configured", channel_id)))?;

        let probe = match calibration {
            ChannelCalibration::LoadCell(c) => CalibrationProbe::LoadCell {
                adc_reading,
                grams: c.adc_reading_to_grams(adc_reading),
            },
            ChannelCalibration::Power(c) => {
                let adc_voltage = to_i16(adc_reading)?;
                let adc_current = to_i16(current_adc.unwrap_or(adc_reading))?;
                let volts = c.adc_voltage_reading_to_volts(adc_voltage);
                let amps = c.adc_current_reading_to_amps(adc_current);
                CalibrationProbe::Power {
                    adc_voltage,
                    adc_current,
                    volts,
                    amps,
                    watts: PowerCalibration::watts(volts, amps),
                }
            }
            ChannelCalibration::Temperature(c) => {
                let r_ohms = c.adc_reading_to_ohms(adc_reading);
                CalibrationProbe::Temperature {
                    adc_reading,
                    r_ohms,
                    t_celsius: c.resistance_to_c(r_ohms),
                }
            }
        };
        debug!("[{}] {}", channel_id, probe);
        Ok(probe)
    }
}

fn to_i16(value: i32) -> Result<i16> {
    i16::try_from(value).map_err(|_| DaqError::config(format!("power adc reading {} does not fit 16 bits", value)))
}

fn build_channel(id: &str, section: &ChannelSection) -> std::result::Result<ChannelCalibration, String> {
    let family = ChannelFamily::from_channel_id(id)
        .ok_or_else(|| "not a valid channel id (expected lcN, pwN or tmN)".to_string())?;

    if let Some(field) = foreign_field(section, family) {
        return Err(format!("field `{}` is not valid for a {} channel", field, family.label()));
    }

    match family {
        ChannelFamily::LoadCell => {
            let adc_offset = require(section.adc_offset, "adc_offset")?;
            let scale = require_finite(section.scale, "scale")?;
            Ok(ChannelCalibration::LoadCell(LoadCellCalibration::new(adc_offset, scale)))
        }
        ChannelFamily::Power => {
            let voltage_offset = require(section.voltage_offset, "voltage_offset")?;
            let voltage_scale = require_finite(section.voltage_scale, "voltage_scale")?;
            let current_offset = require(section.current_offset, "current_offset")?;
            let current_scale = require_finite(section.current_scale, "current_scale")?;
            Ok(ChannelCalibration::Power(PowerCalibration::new(
                voltage_offset,
                voltage_scale,
                current_offset,
                current_scale,
            )))
        }
        ChannelFamily::Temperature => {
            let adc = require(section.adc, "adc")?;
            let (model, wire_r) = match (&section.thermistor, &section.rtd) {
                (Some(t), None) => {
                    positive(t.beta, "thermistor beta")?;
                    positive(t.ref_r, "thermistor ref_r")?;
                    let model = Thermistor::new(t.beta, t.c, t.ref_r, t.ref_c, t.offset);
                    (TemperatureModel::Thermistor(model), t.wire_r)
                }
                (None, Some(r)) => {
                    positive(r.r0, "rtd r0")?;
                    (TemperatureModel::Rtd(Rtd::new(r.r0, r.offset)), r.adjustment)
                }
                (Some(_), Some(_)) => return Err("both `thermistor` and `rtd` given".to_string()),
                (None, None) => return Err("one of `thermistor` or `rtd` is required".to_string()),
            };
            TemperatureCalibration::new(&adc, wire_r, model)
                .map(ChannelCalibration::Temperature)
                .map_err(|e| e.to_string())
        }
        ChannelFamily::Marker | ChannelFamily::ExternalReport => {
            Err("marker and external report channels take no calibration".to_string())
        }
    }
}

/// First field set in `section` that belongs to another family.
fn foreign_field(section: &ChannelSection, family: ChannelFamily) -> Option<&'static str> {
    let fields: [(&'static str, bool, ChannelFamily); 9] = [
        ("adc_offset", section.adc_offset.is_some(), ChannelFamily::LoadCell),
        ("scale", section.scale.is_some(), ChannelFamily::LoadCell),
        ("voltage_offset", section.voltage_offset.is_some(), ChannelFamily::Power),
        ("voltage_scale", section.voltage_scale.is_some(), ChannelFamily::Power),
        ("current_offset", section.current_offset.is_some(), ChannelFamily::Power),
        ("current_scale", section.current_scale.is_some(), ChannelFamily::Power),
        ("adc", section.adc.is_some(), ChannelFamily::Temperature),
        ("thermistor", section.thermistor.is_some(), ChannelFamily::Temperature),
        ("rtd", section.rtd.is_some(), ChannelFamily::Temperature),
    ];
    fields
        .iter()
        .find(|(_, set, owner)| *set && *owner != family)
        .map(|(name, _, _)| *name)
}

fn require<T>(value: Option<T>, field: &str) -> std::result::Result<T, String> {
    value.ok_or_else(|| format!("missing field `{}`", field))
}

fn require_finite(value: Option<f64>, field: &str) -> std::result::Result<f64, String> {
    let value = require(value, field)?;
    if !value.is_finite() {
        return Err(format!("field `{}` must be finite", field));
    }
    Ok(value)
}

fn positive(value: f64, field: &str) -> std::result::Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be positive, got {}", field, value))
    }
}
