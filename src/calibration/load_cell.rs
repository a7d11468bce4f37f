//! Load cell calibration: linear ADC to grams.

/// Linear load cell calibration.
///
/// `grams = (adc - offset) * scale`, computed without any rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadCellCalibration {
    adc_offset: i64,
    scale: f64,
}

impl LoadCellCalibration {
    #[must_use]
    pub fn new(adc_offset: i64, scale: f64) -> Self {
        Self { adc_offset, scale }
    }

    pub fn adc_offset(&self) -> i64 {
        self.adc_offset
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Converts a raw ADC reading to grams.
    ///
    /// # Examples
    ///
    /// ```
    /// use daq_telemetry::calibration::LoadCellCalibration;
    ///
    /// let cal = LoadCellCalibration::new(1000, 0.5);
    /// assert_eq!(cal.adc_reading_to_grams(1010), 5.0);
    /// assert_eq!(cal.adc_reading_to_grams(990), -5.0);
    /// ```
    #[must_use]
    pub fn adc_reading_to_grams(&self, adc_reading: i32) -> f64 {
        (i64::from(adc_reading) - self.adc_offset) as f64 * self.scale
    }
}
