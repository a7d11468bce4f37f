//! # Log Packet Constants and Types
//!
//! Core definitions of the device log protocol: channel families, the typed
//! per-channel values and the parsed packet container.

use serde::Deserialize;

use crate::error::DecodeError;

/// The only supported log packet format version.
pub const LOG_PACKET_VERSION: u8 = 1;

/// Packet header size: version(1) + session_id(4) + base_time(4)
pub const LOG_PACKET_HEADER_SIZE: usize = 9;

/// Length of a channel id token (`lc1`, `mrk`, ...)
pub const CHANNEL_ID_LEN: usize = 3;

/// Channel id of the markers pseudo-channel
pub const MARKER_CHANNEL_ID: &str = "mrk";

/// Channel id of the external reports pseudo-channel
pub const EXTERNAL_CHANNEL_ID: &str = "ext";

/// Legacy single-byte channel ids
pub const LEGACY_MARKER_ID: u8 = 0x07;
pub const LEGACY_LOAD_CELL_IDS: std::ops::RangeInclusive<u8> = 0x11..=0x14;
pub const LEGACY_TEMPERATURE_IDS: std::ops::RangeInclusive<u8> = 0x21..=0x26;
pub const LEGACY_POWER_IDS: std::ops::RangeInclusive<u8> = 0x30..=0x32;

/// How channel ids are encoded on the wire.
///
/// The two encodings have incompatible record layouts and are never mixed
/// within one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelIdEncoding {
    /// Length-prefixed 3-character ASCII token.
    #[default]
    Token,
    /// Single numeric byte, early firmware.
    Legacy,
}

/// Channel family, derived from the channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelFamily {
    LoadCell,
    Power,
    Temperature,
    Marker,
    ExternalReport,
}

impl ChannelFamily {
    /// Derive the family of a channel id.
    ///
    /// Returns `None` if the id is not a valid token or its prefix is not
    /// a known family.
    ///
    /// # Examples
    ///
    /// ```
    /// use daq_telemetry::protocol::ChannelFamily;
    ///
    /// assert_eq!(ChannelFamily::from_channel_id("lc1"), Some(ChannelFamily::LoadCell));
    /// assert_eq!(ChannelFamily::from_channel_id("mrk"), Some(ChannelFamily::Marker));
    /// assert_eq!(ChannelFamily::from_channel_id("xy1"), None);
    /// assert_eq!(ChannelFamily::from_channel_id("lcx"), None);
    /// ```
    pub fn from_channel_id(id: &str) -> Option<Self> {
        if !is_valid_channel_token(id) {
            return None;
        }
        match id {
            MARKER_CHANNEL_ID => return Some(ChannelFamily::Marker),
            EXTERNAL_CHANNEL_ID => return Some(ChannelFamily::ExternalReport),
            _ => {}
        }
        let (prefix, suffix) = id.split_at(2);
        if !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match prefix {
            "lc" => Some(ChannelFamily::LoadCell),
            "pw" => Some(ChannelFamily::Power),
            "tm" => Some(ChannelFamily::Temperature),
            _ => None,
        }
    }

    /// True for ADC sample bursts (load cell, power, temperature).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ChannelFamily::LoadCell | ChannelFamily::Power | ChannelFamily::Temperature
        )
    }

    /// Encoded size of one raw sample, for numeric families.
    pub fn sample_size(self) -> Option<usize> {
        match self {
            ChannelFamily::LoadCell | ChannelFamily::Temperature => Some(3),
            ChannelFamily::Power => Some(4),
            ChannelFamily::Marker | ChannelFamily::ExternalReport => None,
        }
    }

    /// Family name as written to the channels manifest.
    pub fn label(self) -> &'static str {
        match self {
            ChannelFamily::LoadCell => "load_cell",
            ChannelFamily::Power => "power",
            ChannelFamily::Temperature => "temperature",
            ChannelFamily::Marker => "marker",
            ChannelFamily::ExternalReport => "external",
        }
    }
}

/// True if `id` is exactly three lowercase ASCII letters or digits.
pub fn is_valid_channel_token(id: &str) -> bool {
    id.len() == CHANNEL_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Map a legacy single-byte channel id to its token.
pub fn legacy_channel_id(byte: u8) -> Option<String> {
    if byte == LEGACY_MARKER_ID {
        return Some(MARKER_CHANNEL_ID.to_string());
    }
    if LEGACY_LOAD_CELL_IDS.contains(&byte) {
        return Some(format!("lc{}", byte - LEGACY_LOAD_CELL_IDS.start() + 1));
    }
    if LEGACY_TEMPERATURE_IDS.contains(&byte) {
        return Some(format!("tm{}", byte - LEGACY_TEMPERATURE_IDS.start() + 1));
    }
    if LEGACY_POWER_IDS.contains(&byte) {
        return Some(format!("pw{}", byte - LEGACY_POWER_IDS.start() + 1));
    }
    None
}

/// Map a channel token back to its legacy single-byte id.
pub fn legacy_channel_byte(id: &str) -> Option<u8> {
    if id == MARKER_CHANNEL_ID {
        return Some(LEGACY_MARKER_ID);
    }
    if !is_valid_channel_token(id) {
        return None;
    }
    let (prefix, suffix) = id.split_at(2);
    let index: u8 = suffix.parse().ok()?;
    let range = match prefix {
        "lc" => LEGACY_LOAD_CELL_IDS,
        "tm" => LEGACY_TEMPERATURE_IDS,
        "pw" => LEGACY_POWER_IDS,
        _ => return None,
    };
    let byte = range.start().checked_add(index.checked_sub(1)?)?;
    range.contains(&byte).then_some(byte)
}

/// A single load cell sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCellValue {
    pub time_millis: u64,
    pub adc_reading: i32,
    pub grams: f64,
}

/// A single power (volt/amp) sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerValue {
    pub time_millis: u64,
    pub adc_voltage: i16,
    pub adc_current: i16,
    pub volts: f64,
    pub amps: f64,
}

/// A single temperature sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureValue {
    pub time_millis: u64,
    pub adc_reading: i32,
    pub r_ohms: f64,
    pub t_celsius: f64,
}

/// A time marker. Type and value are empty when no rule matched.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerValue {
    pub time_millis: u64,
    pub raw: String,
    pub marker_type: String,
    pub marker_value: String,
}

/// An external data report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalReportValue {
    pub time_millis: u64,
    pub raw: String,
    pub name: String,
    pub value: f64,
}

/// A timestamped value of one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValue {
    LoadCell(LoadCellValue),
    Power(PowerValue),
    Temperature(TemperatureValue),
    Marker(MarkerValue),
    ExternalReport(ExternalReportValue),
}

impl ChannelValue {
    /// Device timestamp of the value in milliseconds.
    pub fn time_millis(&self) -> u64 {
        match self {
            ChannelValue::LoadCell(v) => v.time_millis,
            ChannelValue::Power(v) => v.time_millis,
            ChannelValue::Temperature(v) => v.time_millis,
            ChannelValue::Marker(v) => v.time_millis,
            ChannelValue::ExternalReport(v) => v.time_millis,
        }
    }
}

/// Ordered values of a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelData {
    channel_id: String,
    values: Vec<ChannelValue>,
}

impl ChannelData {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            values: Vec::new(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn values(&self) -> &[ChannelValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn start_time_millis(&self) -> Option<u64> {
        self.values.first().map(ChannelValue::time_millis)
    }

    pub fn end_time_millis(&self) -> Option<u64> {
        self.values.last().map(ChannelValue::time_millis)
    }

    /// Append a block of values.
    ///
    /// # Errors
    ///
    /// Returns `RecordMalformed` if the block is empty or any value is older
    /// than the value before it.
    pub fn append_values(&mut self, values: Vec<ChannelValue>) -> Result<(), DecodeError> {
        if values.is_empty() {
            return Err(self.malformed("empty value block".to_string()));
        }
        let mut last = self.end_time_millis();
        for value in &values {
            let t = value.time_millis();
            if let Some(prev) = last {
                if t < prev {
                    return Err(self.malformed(format!("time went back from {} to {} ms", prev, t)));
                }
            }
            last = Some(t);
        }
        self.values.extend(values);
        Ok(())
    }

    fn malformed(&self, reason: String) -> DecodeError {
        DecodeError::RecordMalformed {
            channel: self.channel_id.clone(),
            reason,
        }
    }
}

/// The decoded content of one log packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLogPacket {
    session_id: u32,
    base_time_millis: u64,
    /// Insertion ordered, unique channel ids.
    channels: Vec<ChannelData>,
}

impl ParsedLogPacket {
    pub fn new(session_id: u32, base_time_millis: u64) -> Self {
        Self {
            session_id,
            base_time_millis,
            channels: Vec::new(),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn base_time_millis(&self) -> u64 {
        self.base_time_millis
    }

    pub fn channels(&self) -> &[ChannelData] {
        &self.channels
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelData> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.channel_id.as_str())
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Earliest value timestamp across channels, `None` if no channels.
    pub fn start_time_millis(&self) -> Option<u64> {
        self.channels
            .iter()
            .filter_map(ChannelData::start_time_millis)
            .min()
    }

    /// Latest value timestamp across channels, `None` if no channels.
    pub fn end_time_millis(&self) -> Option<u64> {
        self.channels
            .iter()
            .filter_map(ChannelData::end_time_millis)
            .max()
    }

    /// Append values to a channel, creating it on first use.
    pub fn append_values(&mut self, channel_id: &str, values: Vec<ChannelValue>) -> Result<(), DecodeError> {
        let index = match self.channels.iter().position(|c| c.channel_id == channel_id) {
            Some(i) => i,
            None => {
                self.channels.push(ChannelData::new(channel_id));
                self.channels.len() - 1
            }
        };
        self.channels[index].append_values(values)
    }
}
