//! # Export Module
//!
//! Offline processing of a recorded byte stream into CSV files.
//!
//! This module handles:
//! - Deframing and decoding the recorded log packets
//! - Session and test tracking over the packet stream
//! - One CSV file per configured channel plus markers, external reports,
//!   tests and a channels manifest
//! - The run summary, logged and optionally written as JSON
//!
//! Any decode or session error aborts the export.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::calibration::{ChannelConfigSet, PowerCalibration};
use crate::config::Config;
use crate::error::{DaqError, Result};
use crate::protocol::{
    ChannelFamily, ChannelIdEncoding, ChannelValue, LogPacketDecoder, ParsedLogPacket,
    EXTERNAL_CHANNEL_ID, MARKER_CHANNEL_ID,
};
use crate::session::{SessionTracker, TestRange};
use crate::transport::{FrameDecoder, FrameStats};

/// Prefix of the per-channel output files.
pub const CHANNEL_FILE_PREFIX: &str = "_channel_";

/// Input read size
const READ_CHUNK_SIZE: usize = 1000;

/// Progress log period of [`export_file`]
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

struct OutputCsv {
    id: String,
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl OutputCsv {
    fn create(dir: &Path, id: &str, base_name: &str, header: &[&str]) -> Result<Self> {
        let path = dir.join(format!("{}.csv", base_name));
        info!("Creating output file: {}", path.display());
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(header)?;
        Ok(Self {
            id: id.to_string(),
            path,
            writer,
            rows: 0,
        })
    }

    fn write(&mut self, record: &[String]) -> Result<()> {
        self.writer.write_record(record)?;
        self.rows += 1;
        Ok(())
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn close(mut self) -> Result<OutputFileSummary> {
        self.writer.flush()?;
        Ok(OutputFileSummary {
            id: self.id,
            path: self.path,
            rows: self.rows,
        })
    }
}

/// One written output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputFileSummary {
    pub id: String,
    pub path: PathBuf,
    pub rows: u64,
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// RFC 3339 creation time of the summary.
    pub generated_at: String,
    pub bytes: u64,
    pub frames: u64,
    pub dropped_frames: u64,
    pub bad_crc_frames: u64,
    /// Valid frames of other types than log.
    pub skipped_frames: u64,
    pub packets: u64,
    pub sessions: u32,
    pub span_secs: f64,
    /// Decoded values per channel id.
    pub rows: BTreeMap<String, u64>,
    pub tests: Vec<TestRange>,
    /// Unconfigured channels and how many samples of each were skipped.
    pub ignored_channels: BTreeMap<String, u64>,
    pub files: Vec<OutputFileSummary>,
}

impl RunSummary {
    /// Log the summary at INFO level.
    pub fn log(&self) {
        info!(
            "Bytes: {}, frames: {}, dropped: {}, packets: {}, sessions: {}",
            self.bytes, self.frames, self.dropped_frames, self.packets, self.sessions
        );
        for file in &self.files {
            info!("* {:10} {:8} rows  {}", file.id, file.rows, file.path.display());
        }
        for (channel, samples) in &self.ignored_channels {
            info!("Ignored channel [{}]: {} samples", channel, samples);
        }
        info!("Tests: {}", self.tests.len());
        info!("Time span: {:.3} secs", self.span_secs);
    }

    /// Write the summary as pretty printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self).map_err(std::io::Error::from)?;
        info!("Summary written to {}", path.as_ref().display());
        Ok(())
    }
}

/// Streams recorded bytes into the CSV output files.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use daq_telemetry::calibration::ChannelConfigSet;
/// use daq_telemetry::config::Config;
/// use daq_telemetry::export::Exporter;
/// use daq_telemetry::protocol::ChannelIdEncoding;
///
/// let config = Config::load("config/sys_config.toml")?;
/// let channels = Arc::new(ChannelConfigSet::from_config(&config)?);
/// let mut exporter = Exporter::create("out", channels, ChannelIdEncoding::Token)?;
/// exporter.feed_bytes(&std::fs::read("session.bin")?)?;
/// exporter.finish()?.log();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Exporter {
    output_dir: PathBuf,
    config: Arc<ChannelConfigSet>,
    frames: FrameDecoder,
    decoder: LogPacketDecoder,
    tracker: SessionTracker,
    channel_files: BTreeMap<String, OutputCsv>,
    markers: OutputCsv,
    external: OutputCsv,
    tests: OutputCsv,
    skipped_frames: u64,
    log_packets: u64,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("output_dir", &self.output_dir)
            .field("packets", &self.tracker.packets())
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Create the output files in `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `output_dir` is not an existing directory
    /// - It already holds per-channel output files
    /// - A file cannot be created
    pub fn create<P: AsRef<Path>>(
        output_dir: P,
        config: Arc<ChannelConfigSet>,
        encoding: ChannelIdEncoding,
    ) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        check_output_dir(&output_dir)?;

        let mut channel_files = BTreeMap::new();
        for (id, calibration) in config.channels() {
            let header: &[&str] = match calibration.family() {
                ChannelFamily::LoadCell => &["T[ms]", "Value[adc]", "Value[g]"],
                ChannelFamily::Power => &[
                    "T[ms]",
                    "Voltage[adc]",
                    "Current[adc]",
                    "Voltage[V]",
                    "Current[A]",
                    "Power[W]",
                ],
                _ => &["T[ms]", "Value[adc]", "Value[R]", "Value[C]"],
            };
            let base_name = format!("{}{}", CHANNEL_FILE_PREFIX, id);
            channel_files.insert(id.to_string(), OutputCsv::create(&output_dir, id, &base_name, header)?);
        }

        let markers = OutputCsv::create(&output_dir, "markers", "_markers", &["T[ms]", "Name", "Type", "Value"])?;
        let external = OutputCsv::create(&output_dir, "ext", "_ext", &["T[ms]", "Report", "Name", "Value"])?;
        let tests = OutputCsv::create(&output_dir, "tests", "_tests", &["Test", "Start[ms]", "End[ms]"])?;

        Ok(Self {
            output_dir,
            decoder: LogPacketDecoder::new(Arc::clone(&config), encoding),
            config,
            frames: FrameDecoder::new(),
            tracker: SessionTracker::new(),
            channel_files,
            markers,
            external,
            tests,
            skipped_frames: 0,
            log_packets: 0,
        })
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frames.stats()
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Log a one line progress report.
    pub fn report_status(&self) {
        let stats = self.frames.stats();
        info!(
            "Bytes: {}, packets: {}, dropped frames: {}, span: {:.3} secs",
            stats.bytes,
            self.tracker.packets(),
            stats.dropped,
            self.tracker.span_secs()
        );
    }

    /// Process the next chunk of the recorded stream.
    ///
    /// # Errors
    ///
    /// Returns `DaqError::Packet` with the zero-based log packet index on
    /// the first packet that fails to decode, breaks the session rules, or
    /// cannot be written.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for frame in self.frames.push(bytes) {
            if !frame.is_log() {
                debug!("Skipping frame type {} ({} bytes)", frame.frame_type, frame.data.len());
                self.skipped_frames += 1;
                continue;
            }
            let index = self.log_packets;
            self.log_packets += 1;
            self.decoder
                .decode(&frame.data)
                .map_err(DaqError::from)
                .and_then(|packet| self.process_packet(&packet))
                .map_err(|e| DaqError::Packet {
                    index,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    fn process_packet(&mut self, packet: &ParsedLogPacket) -> Result<()> {
        let update = self.tracker.process(packet)?;
        let tracker = &self.tracker;
        let ms = |t: u64| tracker.millis_in_session(t).unwrap_or_default().to_string();

        for channel in packet.channels() {
            let id = channel.channel_id();
            let file = match id {
                MARKER_CHANNEL_ID => &mut self.markers,
                EXTERNAL_CHANNEL_ID => &mut self.external,
                _ => match self.channel_files.get_mut(id) {
                    Some(file) => file,
                    None => continue,
                },
            };

            for value in channel.values() {
                let record = match value {
                    ChannelValue::LoadCell(v) => vec![
                        ms(v.time_millis),
                        v.adc_reading.to_string(),
                        format!("{:.3}", v.grams),
                    ],
                    ChannelValue::Power(v) => vec![
                        ms(v.time_millis),
                        v.adc_voltage.to_string(),
                        v.adc_current.to_string(),
                        format!("{:.3}", v.volts),
                        format!("{:.3}", v.amps),
                        format!("{:.3}", PowerCalibration::watts(v.volts, v.amps)),
                    ],
                    ChannelValue::Temperature(v) => vec![
                        ms(v.time_millis),
                        v.adc_reading.to_string(),
                        format!("{:.2}", v.r_ohms),
                        format!("{:.3}", v.t_celsius),
                    ],
                    ChannelValue::Marker(v) => vec![
                        ms(v.time_millis),
                        v.raw.clone(),
                        v.marker_type.clone(),
                        v.marker_value.clone(),
                    ],
                    ChannelValue::ExternalReport(v) => vec![
                        ms(v.time_millis),
                        v.raw.clone(),
                        v.name.clone(),
                        v.value.to_string(),
                    ],
                };
                file.write(&record)?;
            }
        }

        for test in &update.completed_tests {
            info!("Test [{}]: {} - {} ms", test.name, test.start_ms, test.end_ms);
            self.tests.write(&[test.name.clone(), test.start_ms.to_string(), test.end_ms.to_string()])?;
        }
        Ok(())
    }

    /// Close the output files and write the channels manifest.
    ///
    /// # Errors
    ///
    /// Returns `MissingTestEnd` if the stream ended inside a test, or an I/O
    /// error if a file cannot be flushed.
    pub fn finish(self) -> Result<RunSummary> {
        let stats = self.frames.stats();
        let ignored_channels = self.decoder.ignored_channels().clone();
        let tracked = self.tracker.finish()?;

        let mut manifest = OutputCsv::create(
            &self.output_dir,
            "channels",
            "_channels",
            &["Name", "Type", "Field", "Values", "File"],
        )?;
        for (id, calibration) in self.config.channels() {
            let Some(file) = self.channel_files.get(id) else {
                continue;
            };
            let family = calibration.family();
            let field = match family {
                ChannelFamily::LoadCell => "Value[g]",
                ChannelFamily::Power => "Power[W]",
                _ => "Value[C]",
            };
            manifest.write(&[
                id.to_string(),
                family.label().to_string(),
                field.to_string(),
                file.rows.to_string(),
                file.file_name(),
            ])?;
        }

        let mut files = Vec::new();
        for file in self.channel_files.into_values() {
            files.push(file.close()?);
        }
        files.push(self.markers.close()?);
        files.push(self.external.close()?);
        files.push(self.tests.close()?);
        files.push(manifest.close()?);

        Ok(RunSummary {
            generated_at: Utc::now().to_rfc3339(),
            bytes: stats.bytes,
            frames: stats.frames,
            dropped_frames: stats.dropped,
            bad_crc_frames: stats.bad_crc,
            skipped_frames: self.skipped_frames,
            packets: tracked.packets,
            sessions: tracked.sessions,
            span_secs: tracked.span_secs,
            rows: tracked.row_counts,
            tests: tracked.tests,
            ignored_channels,
            files,
        })
    }
}

fn check_output_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(DaqError::Output(format!("no such directory: {}", dir.display())));
    }
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if name.to_string_lossy().starts_with(CHANNEL_FILE_PREFIX) {
            return Err(DaqError::Output(format!(
                "found preexisting channel file {} in {}",
                name.to_string_lossy(),
                dir.display()
            )));
        }
    }
    Ok(())
}

/// Export a recording file.
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `input` - Recorded byte stream
/// * `output_dir` - Existing directory for the CSV files
///
/// # Returns
///
/// * `Result<RunSummary>` - Counters of the finished run
pub fn export_file<P: AsRef<Path>, Q: AsRef<Path>>(config: &Config, input: P, output_dir: Q) -> Result<RunSummary> {
    let channels = Arc::new(ChannelConfigSet::from_config(config)?);
    info!("Input file: {}", input.as_ref().display());
    info!("Output directory: {}", output_dir.as_ref().display());

    let mut in_file = File::open(input.as_ref())?;
    let mut exporter = Exporter::create(output_dir, channels, config.data_link.channel_id_encoding)?;

    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut last_report = Instant::now();
    loop {
        let n = in_file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        exporter.feed_bytes(&buf[..n])?;
        if last_report.elapsed() > PROGRESS_INTERVAL {
            last_report = Instant::now();
            exporter.report_status();
        }
    }
    exporter.report_status();
    exporter.finish()
}
