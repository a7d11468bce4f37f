//! # Live Monitor Module
//!
//! Live consumer of the device stream.
//!
//! This module handles:
//! - Connecting to the device and reconnecting with backoff
//! - Deframing and decoding packets as they arrive
//! - Restart detection, with stale packets of a retired session dropped
//! - Feeding the display buffers and logging their status periodically
//!
//! Bad packets are logged and dropped; the monitor keeps running.

pub mod source;

pub use source::{ByteSource, Connector, FileConnector, SerialConnector, StreamSource};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::calibration::ChannelConfigSet;
use crate::config::Config;
use crate::display::{DisplayBuffers, SeriesSnapshot};
use crate::error::Result;
use crate::protocol::{ChannelIdEncoding, LogPacketDecoder, ParsedLogPacket};
use crate::session::SessionTracker;
use crate::transport::FrameDecoder;

/// Read buffer size
const READ_BUFFER_SIZE: usize = 4096;

/// Reconnect delay ceiling as a multiple of the base interval
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Data link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Doubling reconnect delay, reset on a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max: base * MAX_BACKOFF_FACTOR,
            current: base,
        }
    }

    /// The delay to wait now.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// What happened to a live packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Packet of the current session.
    Accepted,
    /// Packet of a new session; earlier display data was discarded.
    Reset,
    /// Late packet of the session retired by the last reset, dropped.
    Stale,
    /// Packet that broke the session rules, dropped. A restart it signals
    /// still clears the display.
    Rejected,
}

/// Live packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub accepted: u64,
    pub resets: u64,
    pub stale: u64,
    pub rejected: u64,
    /// Payloads that failed to decode.
    pub bad_packets: u64,
}

/// Session tracking and display state of a live stream.
#[derive(Debug)]
pub struct LiveSession {
    decoder: LogPacketDecoder,
    tracker: SessionTracker,
    display: DisplayBuffers,
    retired_session: Option<u32>,
    stats: LiveStats,
}

impl LiveSession {
    pub fn new(
        channels: Arc<ChannelConfigSet>,
        encoding: ChannelIdEncoding,
        window_secs: f64,
        max_points: usize,
    ) -> Self {
        Self {
            decoder: LogPacketDecoder::new(channels, encoding),
            tracker: SessionTracker::new(),
            display: DisplayBuffers::new(window_secs, max_points),
            retired_session: None,
            stats: LiveStats::default(),
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn display(&self) -> &DisplayBuffers {
        &self.display
    }

    pub fn stats(&self) -> LiveStats {
        self.stats
    }

    /// Decode and process one log payload.
    ///
    /// Returns `None` if the payload does not decode.
    pub fn process_payload(&mut self, payload: &[u8]) -> Option<LiveOutcome> {
        match self.decoder.decode(payload) {
            Ok(packet) => Some(self.process(&packet)),
            Err(e) => {
                warn!("Dropping packet: {}", e);
                self.stats.bad_packets += 1;
                None
            }
        }
    }

    /// Process one decoded packet.
    pub fn process(&mut self, packet: &ParsedLogPacket) -> LiveOutcome {
        let previous = self.tracker.session_id();
        if self.retired_session == Some(packet.session_id()) && previous != Some(packet.session_id()) {
            debug!("Dropping stale packet of session {:08x}", packet.session_id());
            self.stats.stale += 1;
            return LiveOutcome::Stale;
        }

        let result = self.tracker.process(packet);
        if previous.is_some() && self.tracker.session_id() != previous {
            self.retire_session(previous);
        }

        let update = match result {
            Ok(update) => update,
            Err(e) => {
                warn!("Rejecting packet: {}", e);
                self.stats.rejected += 1;
                return LiveOutcome::Rejected;
            }
        };

        let outcome = if update.session_reset {
            LiveOutcome::Reset
        } else {
            self.stats.accepted += 1;
            LiveOutcome::Accepted
        };

        for test in &update.completed_tests {
            info!("Test [{}] completed: {} - {} ms", test.name, test.start_ms, test.end_ms);
        }

        let start = self.tracker.earliest_millis().unwrap_or(packet.base_time_millis());
        if let Err(e) = self.display.ingest(packet, start) {
            warn!("Display update failed: {}", e);
        }
        self.display.prune(self.now_secs());
        outcome
    }

    fn retire_session(&mut self, session_id: Option<u32>) {
        self.retired_session = session_id;
        self.display.clear();
        self.stats.resets += 1;
    }

    /// Session time of the newest value, in seconds.
    pub fn now_secs(&self) -> f64 {
        self.tracker.span_secs()
    }

    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        self.display.snapshot(self.now_secs())
    }

    /// Log latest and mean values of every display series.
    pub fn report_status(&self) {
        info!(
            "Packets: {}, resets: {}, stale: {}, rejected: {}, bad: {}, span: {:.3} secs",
            self.tracker.packets(),
            self.stats.resets,
            self.stats.stale,
            self.stats.rejected,
            self.stats.bad_packets,
            self.now_secs()
        );
        for series in self.snapshot() {
            if let (Some(latest), Some(mean)) = (series.latest, series.mean) {
                info!(
                    "  {:12} latest {:10.3}  mean {:10.3}  ({} points)",
                    series.name,
                    latest,
                    mean,
                    series.points.len()
                );
            }
        }
        for (channel, samples) in self.decoder.ignored_channels() {
            debug!("  ignored [{}]: {} samples", channel, samples);
        }
    }
}

/// Monitor timing.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub reconnect_interval: Duration,
    pub read_timeout: Duration,
    pub report_interval: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_interval: Duration::from_millis(config.data_link.reconnect_interval_ms),
            read_timeout: Duration::from_millis(config.data_link.read_timeout_ms),
            report_interval: Duration::from_millis(config.display.report_interval_ms),
        }
    }
}

enum PumpEnd {
    Shutdown,
    Disconnected,
}

/// Connects to the device and feeds a [`LiveSession`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use daq_telemetry::calibration::ChannelConfigSet;
/// use daq_telemetry::config::Config;
/// use daq_telemetry::monitor::{LiveMonitor, SerialConnector};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load("config/sys_config.toml")?;
///     let channels = Arc::new(ChannelConfigSet::from_config(&config)?);
///     let mut monitor = LiveMonitor::from_config(&config, channels);
///     let mut connector = SerialConnector::from_config(&config.data_link);
///     let (_tx, rx) = tokio::sync::watch::channel(false);
///     monitor.run(&mut connector, rx).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct LiveMonitor {
    session: LiveSession,
    frames: FrameDecoder,
    settings: MonitorSettings,
    backoff: Backoff,
    state: ConnectionState,
}

impl LiveMonitor {
    pub fn new(session: LiveSession, settings: MonitorSettings) -> Self {
        Self {
            session,
            frames: FrameDecoder::new(),
            backoff: Backoff::new(settings.reconnect_interval),
            settings,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn from_config(config: &Config, channels: Arc<ChannelConfigSet>) -> Self {
        let session = LiveSession::new(
            channels,
            config.data_link.channel_id_encoding,
            config.display.window_secs,
            config.display.max_points,
        );
        Self::new(session, MonitorSettings::from_config(config))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &LiveSession {
        &self.session
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Run until shutdown is signalled or the connector gives up.
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens the device byte source
    /// * `shutdown` - Becomes `true` to stop; a dropped sender also stops
    ///
    /// # Errors
    ///
    /// Returns the connect error if the connector does not reconnect.
    pub async fn run(&mut self, connector: &mut dyn Connector, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Monitoring {}", connector.describe());

        while !*shutdown.borrow() {
            self.set_state(ConnectionState::Connecting);
            match connector.connect().await {
                Ok(mut source) => {
                    self.backoff.reset();
                    self.frames.reset();
                    self.set_state(ConnectionState::Connected);
                    let end = self.pump(source.as_mut(), &mut shutdown).await;
                    self.set_state(ConnectionState::Disconnected);
                    if matches!(end, PumpEnd::Shutdown) || !connector.reconnects() {
                        break;
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    if !connector.reconnects() {
                        return Err(e);
                    }
                    warn!("Connect failed: {}", e);
                }
            }

            let delay = self.backoff.next_delay();
            info!("Reconnecting in {} ms", delay.as_millis());
            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.session.report_status();
        info!("Monitor stopped");
        Ok(())
    }

    async fn pump(&mut self, source: &mut dyn ByteSource, shutdown: &mut watch::Receiver<bool>) -> PumpEnd {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let period = self.settings.report_interval;
        let mut status = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return PumpEnd::Shutdown;
                    }
                }
                _ = status.tick() => self.session.report_status(),
                read = timeout(self.settings.read_timeout, source.read_chunk(&mut buf)) => match read {
                    Err(_) => continue,
                    Ok(Ok(0)) => {
                        info!("Data link closed");
                        return PumpEnd::Disconnected;
                    }
                    Ok(Ok(n)) => self.on_bytes(&buf[..n]),
                    Ok(Err(e)) => {
                        warn!("Read failed: {}", e);
                        return PumpEnd::Disconnected;
                    }
                },
            }
        }
    }

    fn on_bytes(&mut self, bytes: &[u8]) {
        for frame in self.frames.push(bytes) {
            if !frame.is_log() {
                debug!("Skipping frame type {}", frame.frame_type);
                continue;
            }
            self.session.process_payload(&frame.data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::source::mocks::{MockConnector, MockSource};
    use super::*;
    use crate::config::tests::sample_config;
    use crate::protocol::PacketEncoder;
    use crate::transport::{encode_frame, FRAME_TYPE_LOG};

    fn channels() -> Arc<ChannelConfigSet> {
        Arc::new(ChannelConfigSet::from_config(&sample_config()).unwrap())
    }

    fn live() -> LiveSession {
        LiveSession::new(channels(), ChannelIdEncoding::Token, 10.0, 1000)
    }

    fn lc_payload(session_id: u32, base: u32, samples: &[i32]) -> Vec<u8> {
        PacketEncoder::new(session_id, base).load_cell("lc1", 0, 10, samples).finish()
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            reconnect_interval: Duration::from_millis(1),
            read_timeout: Duration::from_millis(50),
            report_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_doubles_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100));
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800, 800]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_live_session_accepts_and_displays() {
        let mut session = live();
        assert_eq!(session.process_payload(&lc_payload(1, 1000, &[1000, 1010])), Some(LiveOutcome::Accepted));
        assert_eq!(session.process_payload(&lc_payload(1, 1020, &[1020, 1030])), Some(LiveOutcome::Accepted));

        let lc1 = session.display().series("lc1").unwrap();
        assert_eq!(lc1.values().collect::<Vec<_>>(), vec![0.0, 5.0, 10.0, 15.0]);
        assert_eq!(lc1.times().collect::<Vec<_>>(), vec![0.0, 0.01, 0.02, 0.03]);
        assert_eq!(session.stats().accepted, 2);
    }

    #[test]
    fn test_live_session_reset_and_stale() {
        let mut session = live();
        session.process_payload(&lc_payload(1, 5000, &[1000, 1010]));

        assert_eq!(session.process_payload(&lc_payload(2, 100, &[1040, 1050])), Some(LiveOutcome::Reset));
        let lc1 = session.display().series("lc1").unwrap();
        assert_eq!(lc1.len(), 2);
        assert_eq!(lc1.times().collect::<Vec<_>>(), vec![0.0, 0.01]);

        // Late packet of the restarted session.
        assert_eq!(session.process_payload(&lc_payload(1, 5020, &[1000, 1010])), Some(LiveOutcome::Stale));
        assert_eq!(session.tracker().session_id(), Some(2));
        assert_eq!(session.display().series("lc1").unwrap().len(), 2);

        // Any other new id is a restart.
        assert_eq!(session.process_payload(&lc_payload(3, 0, &[1000, 1010])), Some(LiveOutcome::Reset));
        assert_eq!(session.stats().resets, 2);
        assert_eq!(session.stats().stale, 1);
    }

    #[test]
    fn test_rejected_restart_still_clears_display() {
        let mut session = live();
        let first = PacketEncoder::new(1, 5000)
            .load_cell("lc1", 0, 10, &[1000, 1010])
            .power("pw1", 0, 10, &[(810, 996), (810, 996)])
            .finish();
        assert_eq!(session.process_payload(&first), Some(LiveOutcome::Accepted));
        assert_eq!(session.display().series("pw1.volts").unwrap().len(), 2);

        // Restarted device, but its first packet closes a test that never began.
        let restart = PacketEncoder::new(2, 100)
            .load_cell("lc1", 0, 10, &[1040, 1050])
            .marker(5, "test_end:t1")
            .finish();
        assert_eq!(session.process_payload(&restart), Some(LiveOutcome::Rejected));
        assert_eq!(session.tracker().session_id(), Some(2));
        assert_eq!(session.stats().resets, 1);
        assert_eq!(session.stats().rejected, 1);
        assert_eq!(session.tracker().packets(), 1);
        for name in ["lc1", "pw1.volts", "pw1.amps"] {
            assert!(session.display().series(name).map_or(true, |s| s.is_empty()), "{} kept points", name);
        }

        assert_eq!(session.process_payload(&lc_payload(2, 200, &[1060, 1070])), Some(LiveOutcome::Accepted));
        assert_eq!(session.process_payload(&lc_payload(1, 5100, &[1000, 1010])), Some(LiveOutcome::Stale));
        assert!(session.display().series("pw1.volts").map_or(true, |s| s.is_empty()));
        assert_eq!(session.display().series("lc1").unwrap().times().collect::<Vec<_>>(), vec![0.0, 0.01]);
    }

    #[test]
    fn test_live_session_drops_bad_packets() {
        let mut session = live();
        let mut payload = lc_payload(1, 1000, &[1, 2]);
        payload[0] = 9;
        assert_eq!(session.process_payload(&payload), None);
        assert_eq!(session.stats().bad_packets, 1);

        session.process_payload(&lc_payload(1, 1000, &[1, 2]));
        assert_eq!(session.process_payload(&lc_payload(1, 500, &[3, 4])), Some(LiveOutcome::Rejected));
        assert_eq!(session.stats().rejected, 1);
        assert_eq!(session.process_payload(&lc_payload(1, 2000, &[3, 4])), Some(LiveOutcome::Accepted));
        assert_eq!(session.display().series("lc1").unwrap().len(), 4);
    }

    #[test]
    fn test_live_session_prunes_window() {
        let mut session = LiveSession::new(channels(), ChannelIdEncoding::Token, 1.0, 1000);
        session.process_payload(&lc_payload(1, 0, &[1000, 1000]));
        session.process_payload(&lc_payload(1, 5000, &[1000, 1000]));
        let lc1 = session.display().series("lc1").unwrap();
        assert_eq!(lc1.times().collect::<Vec<_>>(), vec![5.0, 5.01]);
    }

    #[tokio::test]
    async fn test_monitor_reconnects_after_failures() {
        let early = encode_frame(FRAME_TYPE_LOG, &lc_payload(1, 1000, &[1000, 1010]));
        let mut stream = early.clone();
        stream.extend(encode_frame(FRAME_TYPE_LOG, &lc_payload(1, 2000, &[1020, 1030])));
        let (head, tail) = stream.split_at(7);

        // Replayed old data after the last reconnect, then fresh data.
        let mut replay = early;
        replay.extend(encode_frame(FRAME_TYPE_LOG, &lc_payload(1, 3000, &[1040, 1050])));

        let first: Box<dyn ByteSource> =
            Box::new(MockSource::new(vec![Ok(head.to_vec()), Err(std::io::ErrorKind::BrokenPipe)]));
        let second: Box<dyn ByteSource> = Box::new(MockSource::new(vec![Ok(tail.to_vec())]));
        let third: Box<dyn ByteSource> = Box::new(MockSource::new(vec![Ok(replay)]));
        let mut connector = MockConnector::new(vec![None, Some(first), Some(second), Some(third)]);

        let (_tx, rx) = watch::channel(false);
        let mut monitor = LiveMonitor::new(live(), settings());
        monitor.run(&mut connector, rx).await.unwrap();

        assert_eq!(connector.connects, 4);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        // The partial frame of the broken link is discarded.
        assert_eq!(monitor.session().tracker().packets(), 2);
        assert_eq!(monitor.session().stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_monitor_with_tokio_test_reader() {
        let frame = encode_frame(FRAME_TYPE_LOG, &lc_payload(7, 0, &[1000, 1010]));
        let reader = tokio_test::io::Builder::new().read(&frame[..3]).read(&frame[3..]).build();
        let source: Box<dyn ByteSource> = Box::new(StreamSource::new(reader));
        let mut connector = MockConnector::new(vec![Some(source)]);

        let (_tx, rx) = watch::channel(false);
        let mut monitor = LiveMonitor::new(live(), settings());
        monitor.run(&mut connector, rx).await.unwrap();

        assert_eq!(monitor.session().tracker().session_id(), Some(7));
        assert_eq!(monitor.session().display().series("lc1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_monitor_gives_up_without_reconnect() {
        let mut connector = MockConnector::new(vec![]);
        let (_tx, rx) = watch::channel(false);
        let mut monitor = LiveMonitor::new(live(), settings());
        assert!(monitor.run(&mut connector, rx).await.is_err());
        assert_eq!(connector.connects, 1);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let reader = tokio_test::io::Builder::new().wait(Duration::from_secs(3600)).build();
        let source: Box<dyn ByteSource> = Box::new(StreamSource::new(reader));
        let mut connector = MockConnector::new(vec![Some(source), None]);

        let (tx, rx) = watch::channel(false);
        let mut monitor = LiveMonitor::new(live(), settings());
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        });
        monitor.run(&mut connector, rx).await.unwrap();
        stopper.await.unwrap();
        assert_eq!(connector.connects, 1);
    }
}
