//! # Log Packet Decoder
//!
//! Decodes log packet payloads into calibrated, typed channel values.
//!
//! ## Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! version:u8 session_id:u32 base_time:u32 record*
//!
//! numeric record:  id rel_time:u16 count:u16 step:u16 sample[count]
//! string record:   id rel_time:u16 count:u16 len:u8 utf8[len]
//! ```
//!
//! `id` is a length-prefixed token (`03 'l' 'c' '1'`) or, with the legacy
//! encoding, a single byte. Load cell and temperature samples are signed
//! 24-bit, power samples are two signed 16-bit values (voltage, current).

use bytes::Buf;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::packet::*;
use crate::calibration::ChannelConfigSet;
use crate::error::DecodeError;

/// Stateful decoder for one stream of log packets.
///
/// Holds the shared calibration set and counts samples of channels that
/// are present in the stream but not configured.
#[derive(Debug)]
pub struct LogPacketDecoder {
    config: Arc<ChannelConfigSet>,
    encoding: ChannelIdEncoding,
    ignored: BTreeMap<String, u64>,
}

impl LogPacketDecoder {
    pub fn new(config: Arc<ChannelConfigSet>, encoding: ChannelIdEncoding) -> Self {
        Self {
            config,
            encoding,
            ignored: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &Arc<ChannelConfigSet> {
        &self.config
    }

    pub fn encoding(&self) -> ChannelIdEncoding {
        self.encoding
    }

    /// Samples skipped per unconfigured channel id.
    pub fn ignored_channels(&self) -> &BTreeMap<String, u64> {
        &self.ignored
    }

    /// Decode one packet payload.
    ///
    /// # Arguments
    ///
    /// * `payload` - Deframed packet bytes
    ///
    /// # Returns
    ///
    /// * `Result<ParsedLogPacket, DecodeError>` - Values of every configured
    ///   channel plus all markers and external reports
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The header is short (`MalformedPacket`) or of another version
    /// - A channel id is unknown
    /// - A record is cut short (`TruncatedPacket`)
    /// - A record violates the protocol (`RecordMalformed`)
    ///
    /// Ignored-channel counts of a failed packet are not rolled back.
    pub fn decode(&mut self, payload: &[u8]) -> Result<ParsedLogPacket, DecodeError> {
        decode_payload(payload, &self.config, self.encoding, &mut self.ignored)
    }
}

/// Decode one token-encoded payload without keeping ignored-channel counts.
///
/// # Examples
///
/// ```
/// use daq_telemetry::calibration::ChannelConfigSet;
/// use daq_telemetry::protocol::{decode, PacketEncoder};
///
/// let payload = PacketEncoder::new(1, 500).marker(10, "hello").finish();
/// let packet = decode(&payload, &ChannelConfigSet::default())?;
/// assert_eq!(packet.start_time_millis(), Some(510));
/// # Ok::<(), daq_telemetry::error::DecodeError>(())
/// ```
pub fn decode(payload: &[u8], config: &ChannelConfigSet) -> Result<ParsedLogPacket, DecodeError> {
    let mut ignored = BTreeMap::new();
    decode_payload(payload, config, ChannelIdEncoding::Token, &mut ignored)
}

/// Byte cursor with offset-aware bounds checks.
struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn header(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::MalformedPacket {
                offset: self.offset(),
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn record(&self, channel: &str, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::TruncatedPacket {
                channel: channel.to_string(),
                offset: self.offset(),
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, channel: &str) -> Result<u8, DecodeError> {
        self.record(channel, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, channel: &str) -> Result<u16, DecodeError> {
        self.record(channel, 2)?;
        Ok(self.buf.get_u16())
    }

    fn bytes(&mut self, channel: &str, len: usize) -> Result<&'a [u8], DecodeError> {
        self.record(channel, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, channel: &str) -> Result<String, DecodeError> {
        let len = self.u8(channel)? as usize;
        let bytes = self.bytes(channel, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::RecordMalformed {
            channel: channel.to_string(),
            reason: "string is not valid UTF-8".to_string(),
        })
    }

    /// Signed 24-bit, caller checked the length.
    fn i24(&mut self) -> i32 {
        let raw = self.buf.get_uint(3) as i64;
        ((raw << 40) >> 40) as i32
    }
}

fn malformed(channel: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::RecordMalformed {
        channel: channel.to_string(),
        reason: reason.into(),
    }
}

fn decode_payload(
    payload: &[u8],
    config: &ChannelConfigSet,
    encoding: ChannelIdEncoding,
    ignored: &mut BTreeMap<String, u64>,
) -> Result<ParsedLogPacket, DecodeError> {
    let mut reader = Reader::new(payload);

    reader.header(1)?;
    let version = reader.buf.get_u8();
    if version != LOG_PACKET_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    reader.header(LOG_PACKET_HEADER_SIZE - 1)?;
    let session_id = reader.buf.get_u32();
    let base_time = u64::from(reader.buf.get_u32());

    let mut packet = ParsedLogPacket::new(session_id, base_time);

    while reader.buf.has_remaining() {
        let channel_id = read_channel_id(&mut reader, encoding)?;
        let family = ChannelFamily::from_channel_id(&channel_id)
            .ok_or_else(|| DecodeError::UnknownChannelId(channel_id.clone()))?;

        let rel_time = reader.u16(&channel_id)?;
        let count = reader.u16(&channel_id)?;
        let first_time = base_time + u64::from(rel_time);

        match family.sample_size() {
            Some(sample_size) => {
                if count <= 1 {
                    return Err(malformed(
                        &channel_id,
                        format!("numeric record needs more than one sample, got {}", count),
                    ));
                }
                let step = u64::from(reader.u16(&channel_id)?);
                let body_len = usize::from(count) * sample_size;
                reader.record(&channel_id, body_len)?;

                if !config.is_configured(&channel_id) {
                    reader.buf.advance(body_len);
                    let skipped = ignored.entry(channel_id.clone()).or_insert(0);
                    if *skipped == 0 {
                        info!("Ignoring unconfigured channel [{}]", channel_id);
                    }
                    *skipped += u64::from(count);
                    continue;
                }

                let times = (0..u64::from(count)).map(|i| first_time + i * step);
                let values = read_samples(&mut reader, config, family, &channel_id, times)?;
                packet.append_values(&channel_id, values)?;
            }
            None => {
                if count != 1 {
                    return Err(malformed(
                        &channel_id,
                        format!("string record must carry exactly one value, got {}", count),
                    ));
                }
                let text = reader.string(&channel_id)?;
                let (target, value) = match family {
                    ChannelFamily::Marker => (MARKER_CHANNEL_ID, marker_value(config, first_time, text)),
                    _ => parse_external_report(config, first_time, text)?,
                };
                packet.append_values(target, vec![value])?;
            }
        }
    }

    debug!(
        "Decoded packet session={} base={} channels={} bytes={}",
        session_id,
        base_time,
        packet.num_channels(),
        payload.len()
    );
    Ok(packet)
}

fn read_channel_id(reader: &mut Reader<'_>, encoding: ChannelIdEncoding) -> Result<String, DecodeError> {
    match encoding {
        ChannelIdEncoding::Token => {
            let len = reader.u8("?")? as usize;
            let raw = reader.bytes("?", len)?;
            let id = String::from_utf8_lossy(raw).into_owned();
            if !is_valid_channel_token(&id) {
                return Err(malformed(&id, "invalid channel id token"));
            }
            Ok(id)
        }
        ChannelIdEncoding::Legacy => {
            let byte = reader.u8("?")?;
            legacy_channel_id(byte).ok_or_else(|| DecodeError::UnknownChannelId(format!("0x{:02x}", byte)))
        }
    }
}

fn read_samples(
    reader: &mut Reader<'_>,
    config: &ChannelConfigSet,
    family: ChannelFamily,
    channel_id: &str,
    times: impl Iterator<Item = u64>,
) -> Result<Vec<ChannelValue>, DecodeError> {
    let not_configured = || malformed(channel_id, "channel has no calibration for its family");

    match family {
        ChannelFamily::LoadCell => {
            let cal = config.load_cell(channel_id).ok_or_else(not_configured)?;
            Ok(times
                .map(|time_millis| {
                    let adc_reading = reader.i24();
                    ChannelValue::LoadCell(LoadCellValue {
                        time_millis,
                        adc_reading,
                        grams: cal.adc_reading_to_grams(adc_reading),
                    })
                })
                .collect())
        }
        ChannelFamily::Power => {
            let cal = config.power(channel_id).ok_or_else(not_configured)?;
            Ok(times
                .map(|time_millis| {
                    let adc_voltage = reader.buf.get_i16();
                    let adc_current = reader.buf.get_i16();
                    ChannelValue::Power(PowerValue {
                        time_millis,
                        adc_voltage,
                        adc_current,
                        volts: cal.adc_voltage_reading_to_volts(adc_voltage),
                        amps: cal.adc_current_reading_to_amps(adc_current),
                    })
                })
                .collect())
        }
        ChannelFamily::Temperature => {
            let cal = config.temperature(channel_id).ok_or_else(not_configured)?;
            Ok(times
                .map(|time_millis| {
                    let adc_reading = reader.i24();
                    let r_ohms = cal.adc_reading_to_ohms(adc_reading);
                    ChannelValue::Temperature(TemperatureValue {
                        time_millis,
                        adc_reading,
                        r_ohms,
                        t_celsius: cal.resistance_to_c(r_ohms),
                    })
                })
                .collect())
        }
        ChannelFamily::Marker | ChannelFamily::ExternalReport => Err(malformed(channel_id, "not a numeric channel")),
    }
}

fn marker_value(config: &ChannelConfigSet, time_millis: u64, raw: String) -> ChannelValue {
    let (marker_type, marker_value) = config.markers().classify_marker(&raw);
    ChannelValue::Marker(MarkerValue {
        time_millis,
        raw,
        marker_type,
        marker_value,
    })
}

/// Split an external report into its target channel and value.
///
/// `mrk:<type>[:<value>]` is a marker, anything else must be `<name>:<float>`.
fn parse_external_report(
    config: &ChannelConfigSet,
    time_millis: u64,
    text: String,
) -> Result<(&'static str, ChannelValue), DecodeError> {
    let tokens: Vec<&str> = text.split(':').collect();

    if tokens[0] == MARKER_CHANNEL_ID {
        if !(2..=3).contains(&tokens.len()) {
            return Err(malformed(
                EXTERNAL_CHANNEL_ID,
                format!("marker report [{}] must be mrk:<type>[:<value>]", text),
            ));
        }
        let raw = text[MARKER_CHANNEL_ID.len() + 1..].to_string();
        return Ok((MARKER_CHANNEL_ID, marker_value(config, time_millis, raw)));
    }

    if tokens.len() != 2 {
        return Err(malformed(
            EXTERNAL_CHANNEL_ID,
            format!("report [{}] must be <name>:<value>", text),
        ));
    }
    let name = tokens[0].to_string();
    let value: f64 = tokens[1].trim().parse().map_err(|_| {
        malformed(
            EXTERNAL_CHANNEL_ID,
            format!("report [{}] value is not a number", text),
        )
    })?;

    Ok((
        EXTERNAL_CHANNEL_ID,
        ChannelValue::ExternalReport(ExternalReportValue {
            time_millis,
            raw: text,
            name,
            value,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::protocol::encoder::{encode_packet, PacketEncoder};

    fn config() -> Arc<ChannelConfigSet> {
        Arc::new(ChannelConfigSet::from_config(&sample_config()).unwrap())
    }

    fn decoder() -> LogPacketDecoder {
        LogPacketDecoder::new(config(), ChannelIdEncoding::Token)
    }

    #[test]
    fn test_decode_header_only() {
        let payload = PacketEncoder::new(42, 1000).finish();
        let packet = decoder().decode(&payload).unwrap();
        assert_eq!(packet.session_id(), 42);
        assert_eq!(packet.base_time_millis(), 1000);
        assert!(packet.is_empty());
        assert_eq!(packet.start_time_millis(), None);
    }

    #[test]
    fn test_decode_load_cell_times_and_grams() {
        let payload = PacketEncoder::new(1, 1000).load_cell("lc1", 5, 10, &[1000, 1010, 990]).finish();
        let packet = decoder().decode(&payload).unwrap();
        let values = packet.channel("lc1").unwrap().values();
        assert_eq!(
            values,
            &[
                ChannelValue::LoadCell(LoadCellValue { time_millis: 1005, adc_reading: 1000, grams: 0.0 }),
                ChannelValue::LoadCell(LoadCellValue { time_millis: 1015, adc_reading: 1010, grams: 5.0 }),
                ChannelValue::LoadCell(LoadCellValue { time_millis: 1025, adc_reading: 990, grams: -5.0 }),
            ]
        );
    }

    #[test]
    fn test_decode_int24_sign_extension() {
        let payload = PacketEncoder::new(1, 0)
            .load_cell("lc1", 0, 1, &[-8_388_608, 8_388_607, -1])
            .finish();
        let packet = decoder().decode(&payload).unwrap();
        let adcs: Vec<i32> = packet
            .channel("lc1")
            .unwrap()
            .values()
            .iter()
            .map(|v| match v {
                ChannelValue::LoadCell(v) => v.adc_reading,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(adcs, vec![-8_388_608, 8_388_607, -1]);
    }

    #[test]
    fn test_decode_power_and_temperature() {
        let payload = PacketEncoder::new(1, 0)
            .power("pw1", 0, 100, &[(9610, 1996), (10, -4)])
            .temperature("tm2", 0, 100, &[500_000, 0])
            .finish();
        let packet = decoder().decode(&payload).unwrap();

        match &packet.channel("pw1").unwrap().values()[0] {
            ChannelValue::Power(v) => {
                assert_eq!(v.volts, 12.0);
                assert_eq!(v.amps, 1.0);
            }
            other => panic!("unexpected value {:?}", other),
        }
        match &packet.channel("tm2").unwrap().values()[..] {
            [ChannelValue::Temperature(a), ChannelValue::Temperature(b)] => {
                assert_eq!(a.r_ohms, 1000.0);
                assert_eq!(a.t_celsius, 0.0);
                assert_eq!(b.r_ohms, 0.0);
                assert_eq!(b.t_celsius, crate::calibration::OPEN_CIRCUIT_C);
                assert_eq!(b.time_millis, 100);
            }
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[test]
    fn test_decode_round_trip() {
        let payload = PacketEncoder::new(9, 20_000)
            .load_cell("lc1", 0, 10, &[1, 2, 3])
            .power("pw1", 3, 20, &[(100, 200), (300, -400)])
            .temperature("tm1", 1, 5, &[400_000, 600_000])
            .marker(7, "test_begin:t1")
            .external(8, "pressure:1.25")
            .load_cell("lc1", 30, 10, &[4, 5])
            .finish();

        let packet = decoder().decode(&payload).unwrap();
        assert_eq!(packet.channel("lc1").unwrap().len(), 5);

        let encoded = encode_packet(&packet, ChannelIdEncoding::Token).unwrap();
        assert_eq!(decoder().decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_decode_round_trip_legacy() {
        let payload = PacketEncoder::with_encoding(3, 0, ChannelIdEncoding::Legacy)
            .load_cell("lc1", 0, 10, &[1, 2])
            .marker(4, "note")
            .finish();
        let mut decoder = LogPacketDecoder::new(config(), ChannelIdEncoding::Legacy);
        let packet = decoder.decode(&payload).unwrap();
        assert_eq!(packet.channel_ids().collect::<Vec<_>>(), vec!["lc1", "mrk"]);

        let encoded = encode_packet(&packet, ChannelIdEncoding::Legacy).unwrap();
        assert_eq!(encoded, payload);
    }

    #[test]
    fn test_unconfigured_channel_consumed_and_counted() {
        let payload = PacketEncoder::new(1, 0)
            .load_cell("lc2", 0, 10, &[1, 2, 3, 4])
            .power("pw3", 0, 10, &[(1, 1), (2, 2)])
            .load_cell("lc1", 0, 10, &[1000, 1000])
            .load_cell("lc2", 50, 10, &[5, 6])
            .finish();

        let mut decoder = decoder();
        let packet = decoder.decode(&payload).unwrap();

        assert_eq!(packet.channel_ids().collect::<Vec<_>>(), vec!["lc1"]);
        assert_eq!(packet.channel("lc1").unwrap().len(), 2);
        assert_eq!(decoder.ignored_channels().get("lc2"), Some(&6));
        assert_eq!(decoder.ignored_channels().get("pw3"), Some(&2));

        decoder.decode(&payload).unwrap();
        assert_eq!(decoder.ignored_channels().get("lc2"), Some(&12));
    }

    #[test]
    fn test_single_sample_numeric_record_rejected() {
        for count in [0u16, 1] {
            let samples: Vec<i32> = vec![0; count as usize];
            let payload = PacketEncoder::new(1, 0).load_cell("lc1", 0, 10, &samples).finish();
            assert!(matches!(
                decoder().decode(&payload),
                Err(DecodeError::RecordMalformed { .. })
            ));

            // Also for channels that would be ignored.
            let payload = PacketEncoder::new(1, 0).load_cell("lc4", 0, 10, &samples).finish();
            assert!(matches!(
                decoder().decode(&payload),
                Err(DecodeError::RecordMalformed { .. })
            ));
        }
    }

    #[test]
    fn test_marker_count_must_be_one() {
        let payload = PacketEncoder::new(1, 0).string_record("mrk", 0, 2, "x").finish();
        assert!(matches!(
            decoder().decode(&payload),
            Err(DecodeError::RecordMalformed { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut payload = PacketEncoder::new(1, 0).finish();
        payload[0] = 2;
        assert_eq!(decoder().decode(&payload), Err(DecodeError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_short_header_is_malformed() {
        assert!(matches!(
            decoder().decode(&[]),
            Err(DecodeError::MalformedPacket { offset: 0, needed: 1, available: 0 })
        ));
        assert!(matches!(
            decoder().decode(&[1, 0, 0, 0]),
            Err(DecodeError::MalformedPacket { offset: 1, needed: 8, available: 3 })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let payload = PacketEncoder::new(1, 0).load_cell("lc1", 0, 10, &[1, 2, 3]).finish();
        for cut in 1..payload.len() - LOG_PACKET_HEADER_SIZE {
            let result = decoder().decode(&payload[..payload.len() - cut]);
            assert!(
                matches!(result, Err(DecodeError::TruncatedPacket { .. })),
                "cut {} gave {:?}",
                cut,
                result
            );
        }

        let payload = PacketEncoder::new(1, 0).marker(0, "test_begin:a").finish();
        let result = decoder().decode(&payload[..payload.len() - 1]);
        assert!(matches!(
            result,
            Err(DecodeError::TruncatedPacket { ref channel, .. }) if channel == "mrk"
        ));
    }

    #[test]
    fn test_unknown_channel_id() {
        let payload = PacketEncoder::new(1, 0).load_cell("xy1", 0, 1, &[0, 0]).finish();
        assert_eq!(
            decoder().decode(&payload),
            Err(DecodeError::UnknownChannelId("xy1".to_string()))
        );
    }

    #[test]
    fn test_invalid_token_is_malformed() {
        let payload = PacketEncoder::new(1, 0).load_cell("lc12", 0, 1, &[0, 0]).finish();
        assert!(matches!(
            decoder().decode(&payload),
            Err(DecodeError::RecordMalformed { .. })
        ));
    }

    #[test]
    fn test_unknown_legacy_id() {
        let payload = PacketEncoder::with_encoding(1, 0, ChannelIdEncoding::Legacy)
            .load_cell("ext", 0, 1, &[0, 0])
            .finish();
        let mut decoder = LogPacketDecoder::new(config(), ChannelIdEncoding::Legacy);
        assert_eq!(
            decoder.decode(&payload),
            Err(DecodeError::UnknownChannelId("0xff".to_string()))
        );
    }

    #[test]
    fn test_marker_classified() {
        let payload = PacketEncoder::new(1, 100).marker(5, "test_begin:run 1").finish();
        let packet = decoder().decode(&payload).unwrap();
        assert_eq!(
            packet.channel("mrk").unwrap().values(),
            &[ChannelValue::Marker(MarkerValue {
                time_millis: 105,
                raw: "test_begin:run 1".to_string(),
                marker_type: "test_begin".to_string(),
                marker_value: "run 1".to_string(),
            })]
        );
    }

    #[test]
    fn test_unclassified_marker() {
        let payload = PacketEncoder::new(1, 0).marker(0, "something").finish();
        let packet = decoder().decode(&payload).unwrap();
        match &packet.channel("mrk").unwrap().values()[0] {
            ChannelValue::Marker(m) => {
                assert_eq!(m.marker_type, "");
                assert_eq!(m.marker_value, "");
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_external_report() {
        let payload = PacketEncoder::new(1, 0).external(2, "flow:-3.5").finish();
        let packet = decoder().decode(&payload).unwrap();
        assert_eq!(
            packet.channel("ext").unwrap().values(),
            &[ChannelValue::ExternalReport(ExternalReportValue {
                time_millis: 2,
                raw: "flow:-3.5".to_string(),
                name: "flow".to_string(),
                value: -3.5,
            })]
        );
    }

    #[test]
    fn test_external_marker_report() {
        let payload = PacketEncoder::new(1, 0)
            .external(2, "mrk:test_end:t1")
            .external(3, "mrk:note")
            .finish();
        let packet = decoder().decode(&payload).unwrap();
        assert!(packet.channel("ext").is_none());
        let markers = packet.channel("mrk").unwrap().values();
        assert_eq!(markers.len(), 2);
        match (&markers[0], &markers[1]) {
            (ChannelValue::Marker(a), ChannelValue::Marker(b)) => {
                assert_eq!(a.raw, "test_end:t1");
                assert_eq!(a.marker_type, "test_end");
                assert_eq!(a.marker_value, "t1");
                assert_eq!(b.marker_type, "note");
            }
            other => panic!("unexpected values {:?}", other),
        }
    }

    #[test]
    fn test_malformed_external_reports() {
        for text in ["flow", "flow:1:2", "flow:abc", "mrk", "mrk:a:b:c", ""] {
            let payload = PacketEncoder::new(1, 0).external(0, text).finish();
            assert!(
                matches!(decoder().decode(&payload), Err(DecodeError::RecordMalformed { .. })),
                "[{}] accepted",
                text
            );
        }
    }

    #[test]
    fn test_invalid_utf8_marker() {
        let payload = PacketEncoder::new(1, 0)
            .numeric_header("mrk", 0, 1, 0)
            .finish();
        // numeric_header wrote step 0x0000, read back as len 0 then a stray byte.
        assert!(decoder().decode(&payload).is_err());

        let mut payload = PacketEncoder::new(1, 0).marker(0, "ab").finish();
        let last = payload.len() - 1;
        payload[last] = 0xFF;
        assert!(matches!(
            decoder().decode(&payload),
            Err(DecodeError::RecordMalformed { .. })
        ));
    }

    #[test]
    fn test_time_regression_within_packet() {
        let payload = PacketEncoder::new(1, 0)
            .load_cell("lc1", 100, 10, &[1, 2])
            .load_cell("lc1", 50, 10, &[3, 4])
            .finish();
        assert!(matches!(
            decoder().decode(&payload),
            Err(DecodeError::RecordMalformed { .. })
        ));
    }

    #[test]
    fn test_free_decode_function() {
        let set = ChannelConfigSet::from_config(&sample_config()).unwrap();
        let payload = PacketEncoder::new(1, 0)
            .load_cell("lc1", 0, 1, &[1000, 1002])
            .load_cell("lc3", 0, 1, &[0, 0])
            .finish();
        let packet = decode(&payload, &set).unwrap();
        assert_eq!(packet.num_channels(), 1);
    }
}
