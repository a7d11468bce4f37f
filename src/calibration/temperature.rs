//! # Temperature Calibration
//!
//! Converts temperature ADC readings to resistance and then to degrees
//! Celsius. The resistance stage is shared; the resistance to temperature
//! stage is one of two models chosen per channel at configuration load:
//!
//! - [`Thermistor`]: Steinhart-Hart equation anchored at a reference point.
//! - [`Rtd`]: linear interpolation over the PT1000 table.
//!
//! Faults are reported through sentinel values rather than errors: an open
//! input reads as [`OPEN_CIRCUIT_OHMS`] and any resistance outside a model's
//! valid range reads as [`OPEN_CIRCUIT_C`].

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

use crate::config::AdcSection;
use crate::error::{DaqError, Result};

/// Resistance reported for an open (disconnected) input.
pub const OPEN_CIRCUIT_OHMS: f64 = 99_999_999.0;

/// Temperature reported for an open or shorted input.
pub const OPEN_CIRCUIT_C: f64 = -273.15;

/// Upper clamp of thermistor readings.
pub const MAX_VALID_C: f64 = 999.0;

/// ADC ratio at and above which the input is considered open.
const OPEN_CIRCUIT_RATIO: f64 = 0.99;

const KELVIN_OFFSET: f64 = 273.15;

/// PT1000 reference table, (°C, ohms), -50°C to 500°C in 10°C steps.
pub const PT1000_TABLE: [(f64, f64); 56] = [
    (-50.0, 803.1),
    (-40.0, 842.7),
    (-30.0, 882.2),
    (-20.0, 921.6),
    (-10.0, 960.9),
    (0.0, 1000.0),
    (10.0, 1039.0),
    (20.0, 1077.9),
    (30.0, 1116.7),
    (40.0, 1155.4),
    (50.0, 1194.0),
    (60.0, 1232.4),
    (70.0, 1270.8),
    (80.0, 1309.0),
    (90.0, 1347.1),
    (100.0, 1385.1),
    (110.0, 1422.9),
    (120.0, 1460.7),
    (130.0, 1498.3),
    (140.0, 1535.8),
    (150.0, 1573.3),
    (160.0, 1610.5),
    (170.0, 1647.7),
    (180.0, 1684.8),
    (190.0, 1721.7),
    (200.0, 1758.6),
    (210.0, 1795.3),
    (220.0, 1831.9),
    (230.0, 1868.4),
    (240.0, 1904.7),
    (250.0, 1941.0),
    (260.0, 1977.1),
    (270.0, 2013.1),
    (280.0, 2049.0),
    (290.0, 2084.8),
    (300.0, 2120.5),
    (310.0, 2156.1),
    (320.0, 2191.5),
    (330.0, 2226.8),
    (340.0, 2262.1),
    (350.0, 2297.2),
    (360.0, 2332.1),
    (370.0, 2367.0),
    (380.0, 2401.8),
    (390.0, 2436.4),
    (400.0, 2470.9),
    (410.0, 2505.3),
    (420.0, 2539.6),
    (430.0, 2573.8),
    (440.0, 2607.8),
    (450.0, 2641.8),
    (460.0, 2675.6),
    (470.0, 2709.3),
    (480.0, 2742.9),
    (490.0, 2776.4),
    (500.0, 2809.8),
];

/// A resistance to temperature model.
pub trait ResistanceToCelsius {
    /// Converts a resistance in ohms to °C, or [`OPEN_CIRCUIT_C`] when the
    /// resistance is outside the model's valid range.
    fn resistance_to_c(&self, r_ohms: f64) -> f64;
}

/// Steinhart-Hart thermistor model.
///
/// `1/T = A + B*ln(R) + C*ln(R)^3`, with `B = 1/beta` and `A` solved so the
/// curve passes through the reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thermistor {
    a: f64,
    b: f64,
    c: f64,
    offset: f64,
}

impl Thermistor {
    /// Builds the model from its beta, C coefficient and reference point.
    ///
    /// `offset` (°C) is added to every valid result.
    pub fn new(beta: f64, c: f64, ref_r: f64, ref_c: f64, offset: f64) -> Self {
        let b = 1.0 / beta;
        let ln_ref = ref_r.ln();
        let a = 1.0 / (ref_c + KELVIN_OFFSET) - b * ln_ref - c * ln_ref.powi(3);
        Self { a, b, c, offset }
    }

    pub fn coefficients(&self) -> (f64, f64, f64) {
        (self.a, self.b, self.c)
    }
}

impl ResistanceToCelsius for Thermistor {
    fn resistance_to_c(&self, r_ohms: f64) -> f64 {
        if !(r_ohms > 1.0 && r_ohms < OPEN_CIRCUIT_OHMS) {
            return OPEN_CIRCUIT_C;
        }
        let ln_r = r_ohms.ln();
        let recip_kelvin = self.a + self.b * ln_r + self.c * ln_r.powi(3);
        let t = 1.0 / recip_kelvin - KELVIN_OFFSET + self.offset;
        t.min(MAX_VALID_C)
    }
}

/// Platinum RTD model, interpolated over [`PT1000_TABLE`].
///
/// Sensors with another nominal resistance are scaled to PT1000 first.
#[derive(Debug)]
pub struct Rtd {
    r0: f64,
    pt1000_scale: f64,
    offset: f64,
    /// Bucket of the previous lookup, tried first.
    last_bucket: AtomicUsize,
}

impl Rtd {
    /// Builds the model for a sensor with nominal resistance `r0` at 0°C.
    pub fn new(r0: f64, offset: f64) -> Self {
        Self {
            r0,
            pt1000_scale: 1000.0 / r0,
            offset,
            last_bucket: AtomicUsize::new(0),
        }
    }

    pub fn r0(&self) -> f64 {
        self.r0
    }

    /// Interpolates within bucket `i`, `None` if `r` is outside it.
    fn interpolate(i: usize, r: f64) -> Option<f64> {
        let (t_lo, r_lo) = PT1000_TABLE[i];
        let &(t_hi, r_hi) = PT1000_TABLE.get(i + 1)?;
        if r < r_lo || r > r_hi {
            return None;
        }
        if r == r_hi {
            return Some(t_hi);
        }
        Some(t_lo + (r - r_lo) * (t_hi - t_lo) / (r_hi - r_lo))
    }
}

impl ResistanceToCelsius for Rtd {
    fn resistance_to_c(&self, r_ohms: f64) -> f64 {
        let pt1000 = r_ohms * self.pt1000_scale;

        let cached = self.last_bucket.load(Ordering::Relaxed);
        if let Some(t) = Self::interpolate(cached, pt1000) {
            return t + self.offset;
        }

        for i in 0..PT1000_TABLE.len() - 1 {
            if let Some(t) = Self::interpolate(i, pt1000) {
                self.last_bucket.store(i, Ordering::Relaxed);
                return t + self.offset;
            }
        }

        OPEN_CIRCUIT_C
    }
}

/// The resistance to temperature model of a channel.
#[derive(Debug)]
pub enum TemperatureModel {
    Thermistor(Thermistor),
    Rtd(Rtd),
}

impl TemperatureModel {
    pub fn kind(&self) -> &'static str {
        match self {
            TemperatureModel::Thermistor(_) => "thermistor",
            TemperatureModel::Rtd(_) => "rtd",
        }
    }
}

impl ResistanceToCelsius for TemperatureModel {
    fn resistance_to_c(&self, r_ohms: f64) -> f64 {
        match self {
            TemperatureModel::Thermistor(m) => m.resistance_to_c(r_ohms),
            TemperatureModel::Rtd(m) => m.resistance_to_c(r_ohms),
        }
    }
}

/// Full calibration of one temperature channel.
#[derive(Debug)]
pub struct TemperatureCalibration {
    adc_open: i64,
    adc_short: i64,
    /// Resistance in series with the sensor, derived from the calibration reading.
    r_series: f64,
    model: TemperatureModel,
}

impl TemperatureCalibration {
    /// Builds a temperature calibration.
    ///
    /// # Arguments
    ///
    /// * `adc` - Open, short and calibration resistor reference readings
    /// * `wire_r` - Wire resistance in series with the sensor
    /// * `model` - Resistance to temperature model
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the reference readings are degenerate.
    pub fn new(adc: &AdcSection, wire_r: f64, model: TemperatureModel) -> Result<Self> {
        if adc.open == adc.short {
            return Err(DaqError::config(format!(
                "adc open and short readings must differ (both {})",
                adc.open
            )));
        }
        if adc.calib == adc.short {
            return Err(DaqError::config(format!(
                "adc calib and short readings must differ (both {})",
                adc.calib
            )));
        }
        if !(adc.calib_r.is_finite() && adc.calib_r > 0.0) {
            return Err(DaqError::config("adc calib_r must be a positive resistance"));
        }

        let r_series =
            wire_r + adc.calib_r * (adc.open - adc.calib) as f64 / (adc.calib - adc.short) as f64;

        Ok(Self {
            adc_open: adc.open,
            adc_short: adc.short,
            r_series,
            model,
        })
    }

    pub fn r_series(&self) -> f64 {
        self.r_series
    }

    pub fn model(&self) -> &TemperatureModel {
        &self.model
    }

    /// Converts a raw ADC reading to ohms.
    ///
    /// Returns 0 for a shorted input and [`OPEN_CIRCUIT_OHMS`] for an open one.
    pub fn adc_reading_to_ohms(&self, adc_reading: i32) -> f64 {
        let ratio = (i64::from(adc_reading) - self.adc_short) as f64
            / (self.adc_open - self.adc_short) as f64;
        if ratio <= 0.0 {
            return 0.0;
        }
        if ratio >= OPEN_CIRCUIT_RATIO {
            return OPEN_CIRCUIT_OHMS;
        }
        (ratio * self.r_series / (1.0 - ratio)).min(OPEN_CIRCUIT_OHMS)
    }

    pub fn resistance_to_c(&self, r_ohms: f64) -> f64 {
        self.model.resistance_to_c(r_ohms)
    }

    /// Converts a raw ADC reading to °C.
    pub fn adc_reading_to_c(&self, adc_reading: i32) -> f64 {
        let r_ohms = self.adc_reading_to_ohms(adc_reading);
        let t_celsius = self.resistance_to_c(r_ohms);
        trace!(adc_reading, r_ohms, t_celsius, "temperature conversion");
        t_celsius
    }
}
