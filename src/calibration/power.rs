//! Power rail calibration: linear ADC to volts and amps, rounded to 3 decimals.

/// Rounds to 3 decimals, half to even, and folds `-0.0` into `0.0`.
#[inline]
pub(crate) fn round_millis(value: f64) -> f64 {
    (value * 1000.0).round_ties_even() / 1000.0 + 0.0
}

/// Power channel calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerCalibration {
    voltage_offset: i64,
    voltage_scale: f64,
    current_offset: i64,
    current_scale: f64,
}

impl PowerCalibration {
    #[must_use]
    pub fn new(voltage_offset: i64, voltage_scale: f64, current_offset: i64, current_scale: f64) -> Self {
        Self {
            voltage_offset,
            voltage_scale,
            current_offset,
            current_scale,
        }
    }

    /// Converts a raw voltage ADC reading to volts.
    ///
    /// # Examples
    ///
    /// ```
    /// use daq_telemetry::calibration::PowerCalibration;
    ///
    /// let cal = PowerCalibration::new(0, 0.00125, 0, 0.0005);
    /// assert_eq!(cal.adc_voltage_reading_to_volts(9600), 12.0);
    /// ```
    #[must_use]
    pub fn adc_voltage_reading_to_volts(&self, adc_reading: i16) -> f64 {
        round_millis((i64::from(adc_reading) - self.voltage_offset) as f64 * self.voltage_scale)
    }

    /// Converts a raw current ADC reading to amps.
    #[must_use]
    pub fn adc_current_reading_to_amps(&self, adc_reading: i16) -> f64 {
        round_millis((i64::from(adc_reading) - self.current_offset) as f64 * self.current_scale)
    }

    /// Power in watts from calibrated volts and amps, rounded like its inputs.
    #[must_use]
    pub fn watts(volts: f64, amps: f64) -> f64 {
        round_millis(volts * amps)
    }
}
