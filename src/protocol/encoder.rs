//! # Log Packet Encoder
//!
//! Synthetic encoder producing device log packet payloads.
//!
//! The device is the only real producer of log packets; this encoder exists
//! to build fixtures for tests, demos and recorded-file tooling. It writes
//! whatever it is told to, including records the decoder must reject.

use bytes::{BufMut, BytesMut};

use super::packet::*;

/// Builder for one log packet payload.
///
/// # Examples
///
/// ```
/// use daq_telemetry::protocol::PacketEncoder;
///
/// let payload = PacketEncoder::new(7, 1000)
///     .load_cell("lc1", 0, 10, &[100, 200])
///     .marker(5, "test_begin:run1")
///     .finish();
/// assert_eq!(payload[0], 1);
/// ```
#[derive(Debug, Clone)]
pub struct PacketEncoder {
    buf: BytesMut,
    encoding: ChannelIdEncoding,
}

impl PacketEncoder {
    /// Start a packet with token channel ids.
    pub fn new(session_id: u32, base_time_millis: u32) -> Self {
        Self::with_encoding(session_id, base_time_millis, ChannelIdEncoding::Token)
    }

    /// Start a packet with the given channel id encoding.
    pub fn with_encoding(session_id: u32, base_time_millis: u32, encoding: ChannelIdEncoding) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(LOG_PACKET_VERSION);
        buf.put_u32(session_id);
        buf.put_u32(base_time_millis);
        Self { buf, encoding }
    }

    /// Write a load cell record of 24-bit samples.
    pub fn load_cell(self, channel_id: &str, rel_time: u16, step: u16, samples: &[i32]) -> Self {
        self.int24_record(channel_id, rel_time, step, samples)
    }

    /// Write a temperature record of 24-bit samples.
    pub fn temperature(self, channel_id: &str, rel_time: u16, step: u16, samples: &[i32]) -> Self {
        self.int24_record(channel_id, rel_time, step, samples)
    }

    /// Write a power record of (voltage, current) samples.
    pub fn power(mut self, channel_id: &str, rel_time: u16, step: u16, samples: &[(i16, i16)]) -> Self {
        self = self.numeric_header(channel_id, rel_time, samples.len() as u16, step);
        for &(voltage, current) in samples {
            self.buf.put_i16(voltage);
            self.buf.put_i16(current);
        }
        self
    }

    /// Write a marker record on the `mrk` channel.
    pub fn marker(self, rel_time: u16, text: &str) -> Self {
        self.string_record(MARKER_CHANNEL_ID, rel_time, 1, text)
    }

    /// Write an external report record on the `ext` channel.
    pub fn external(self, rel_time: u16, text: &str) -> Self {
        self.string_record(EXTERNAL_CHANNEL_ID, rel_time, 1, text)
    }

    /// Write a string record with an arbitrary id and count.
    pub fn string_record(mut self, channel_id: &str, rel_time: u16, count: u16, text: &str) -> Self {
        self.put_channel_id(channel_id);
        self.buf.put_u16(rel_time);
        self.buf.put_u16(count);
        self.put_string(text);
        self
    }

    /// Write the header of a numeric record. Samples follow via [`Self::raw`].
    pub fn numeric_header(mut self, channel_id: &str, rel_time: u16, count: u16, step: u16) -> Self {
        self.put_channel_id(channel_id);
        self.buf.put_u16(rel_time);
        self.buf.put_u16(count);
        self.buf.put_u16(step);
        self
    }

    /// Append raw bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Finish the packet and return its payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    fn int24_record(mut self, channel_id: &str, rel_time: u16, step: u16, samples: &[i32]) -> Self {
        self = self.numeric_header(channel_id, rel_time, samples.len() as u16, step);
        for &sample in samples {
            self.buf.put_int(i64::from(sample), 3);
        }
        self
    }

    fn put_channel_id(&mut self, channel_id: &str) {
        match self.encoding {
            ChannelIdEncoding::Token => self.put_string(channel_id),
            // Unmappable ids become 0xFF, which no channel uses.
            ChannelIdEncoding::Legacy => self.buf.put_u8(legacy_channel_byte(channel_id).unwrap_or(0xFF)),
        }
    }

    fn put_string(&mut self, text: &str) {
        let bytes = &text.as_bytes()[..text.len().min(u8::MAX as usize)];
        self.buf.put_u8(bytes.len() as u8);
        self.buf.put_slice(bytes);
    }
}

/// Re-encode a parsed packet.
///
/// Each channel becomes one record, or one record per value for markers and
/// external reports. Returns `None` if a channel cannot be expressed: numeric
/// values that are not evenly spaced, times outside the 16-bit offsets, or
/// samples outside their wire width.
pub fn encode_packet(packet: &ParsedLogPacket, encoding: ChannelIdEncoding) -> Option<Vec<u8>> {
    let base = packet.base_time_millis();
    let mut encoder = PacketEncoder::with_encoding(packet.session_id(), u32::try_from(base).ok()?, encoding);

    for channel in packet.channels() {
        let values = channel.values();
        let first = channel.start_time_millis()?;
        let rel = u16::try_from(first.checked_sub(base)?).ok()?;
        let step = match values.get(1) {
            Some(second) => u16::try_from(second.time_millis() - first).ok()?,
            None => 0,
        };
        let evenly_spaced = values
            .iter()
            .enumerate()
            .all(|(i, v)| v.time_millis() == first + i as u64 * u64::from(step));

        match values.first()? {
            ChannelValue::LoadCell(_) | ChannelValue::Temperature(_) => {
                if !evenly_spaced {
                    return None;
                }
                let mut samples = Vec::with_capacity(values.len());
                for value in values {
                    let adc = match value {
                        ChannelValue::LoadCell(v) => v.adc_reading,
                        ChannelValue::Temperature(v) => v.adc_reading,
                        _ => return None,
                    };
                    if !(-(1 << 23)..(1 << 23)).contains(&adc) {
                        return None;
                    }
                    samples.push(adc);
                }
                encoder = encoder.int24_record(channel.channel_id(), rel, step, &samples);
            }
            ChannelValue::Power(_) => {
                if !evenly_spaced {
                    return None;
                }
                let samples = values
                    .iter()
                    .map(|value| match value {
                        ChannelValue::Power(v) => Some((v.adc_voltage, v.adc_current)),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                encoder = encoder.power(channel.channel_id(), rel, step, &samples);
            }
            ChannelValue::Marker(_) | ChannelValue::ExternalReport(_) => {
                for value in values {
                    let rel = u16::try_from(value.time_millis().checked_sub(base)?).ok()?;
                    encoder = match value {
                        ChannelValue::Marker(v) => encoder.marker(rel, &v.raw),
                        ChannelValue::ExternalReport(v) => encoder.external(rel, &v.raw),
                        _ => return None,
                    };
                }
            }
        }
    }

    Some(encoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let payload = PacketEncoder::new(0x01020304, 0x0A0B0C0D).finish();
        assert_eq!(payload, vec![1, 1, 2, 3, 4, 0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(payload.len(), LOG_PACKET_HEADER_SIZE);
    }

    #[test]
    fn test_load_cell_record_layout() {
        let payload = PacketEncoder::new(0, 0).load_cell("lc1", 5, 10, &[1, -1]).finish();
        assert_eq!(
            &payload[LOG_PACKET_HEADER_SIZE..],
            &[3, b'l', b'c', b'1', 0, 5, 0, 2, 0, 10, 0, 0, 1, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_power_record_layout() {
        let payload = PacketEncoder::new(0, 0).power("pw2", 0, 1, &[(256, -2), (0, 1)]).finish();
        assert_eq!(
            &payload[LOG_PACKET_HEADER_SIZE..],
            &[3, b'p', b'w', b'2', 0, 0, 0, 2, 0, 1, 1, 0, 0xFF, 0xFE, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_marker_record_layout() {
        let payload = PacketEncoder::new(0, 0).marker(0x0102, "go").finish();
        assert_eq!(
            &payload[LOG_PACKET_HEADER_SIZE..],
            &[3, b'm', b'r', b'k', 1, 2, 0, 1, 2, b'g', b'o']
        );
    }

    #[test]
    fn test_legacy_ids() {
        let payload = PacketEncoder::with_encoding(0, 0, ChannelIdEncoding::Legacy)
            .load_cell("lc2", 0, 1, &[0, 0])
            .marker(0, "m")
            .temperature("zz9", 0, 1, &[0, 0])
            .finish();
        let body = &payload[LOG_PACKET_HEADER_SIZE..];
        assert_eq!(body[0], 0x12);
        // id(1) + rel(2) + count(2) + step(2) + 2 * 3 bytes
        assert_eq!(body[13], LEGACY_MARKER_ID);
        // marker: id(1) + rel(2) + count(2) + len(1) + 1 byte
        assert_eq!(body[20], 0xFF);
    }

    #[test]
    fn test_long_strings_truncated() {
        let text = "x".repeat(300);
        let payload = PacketEncoder::new(0, 0).external(0, &text).finish();
        let body = &payload[LOG_PACKET_HEADER_SIZE..];
        assert_eq!(body[8], 255);
        assert_eq!(body.len(), 9 + 255);
    }

    #[test]
    fn test_encode_packet_rejects_uneven_spacing() {
        let mut packet = ParsedLogPacket::new(1, 100);
        let lc = |t: u64| {
            ChannelValue::LoadCell(LoadCellValue {
                time_millis: t,
                adc_reading: 0,
                grams: 0.0,
            })
        };
        packet.append_values("lc1", vec![lc(100), lc(110), lc(130)]).unwrap();
        assert_eq!(encode_packet(&packet, ChannelIdEncoding::Token), None);
    }
}
