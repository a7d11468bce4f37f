//! # Session Module
//!
//! Tracks recording sessions and test boundaries over the packet stream.
//!
//! This module handles:
//! - Device restart detection through the packet session id
//! - The session time span (earliest start, latest end)
//! - Test ranges from paired `test_begin` / `test_end` markers
//! - Per-channel ordering checks and row counts
//!
//! Packets must be fed in arrival order.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::protocol::{ChannelValue, ParsedLogPacket, MARKER_CHANNEL_ID};

/// Marker type that opens a test.
pub const TEST_BEGIN_MARKER: &str = "test_begin";

/// Marker type that closes a test.
pub const TEST_END_MARKER: &str = "test_end";

/// A named test interval, in milliseconds since the session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRange {
    pub name: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingTest {
    name: String,
    start_ms: i64,
}

/// What a processed packet changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerUpdate {
    /// The packet started a new session; earlier state was discarded.
    pub session_reset: bool,
    /// Tests closed by markers of this packet.
    pub completed_tests: Vec<TestRange>,
}

/// Final state of a tracked stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSummary {
    /// Id of the last session, `None` if no packet was processed.
    pub session_id: Option<u32>,
    /// Number of sessions seen.
    pub sessions: u32,
    pub packets: u64,
    /// Span of the last session in seconds.
    pub span_secs: f64,
    pub row_counts: BTreeMap<String, u64>,
    pub tests: Vec<TestRange>,
}

/// Session and test-boundary state machine.
///
/// # Examples
///
/// ```
/// use daq_telemetry::calibration::ChannelConfigSet;
/// use daq_telemetry::protocol::{decode, PacketEncoder};
/// use daq_telemetry::session::SessionTracker;
///
/// let config = ChannelConfigSet::default();
/// let mut tracker = SessionTracker::new();
/// tracker.process(&decode(&PacketEncoder::new(1, 1000).marker(0, "start").finish(), &config)?)?;
/// tracker.process(&decode(&PacketEncoder::new(1, 3000).marker(500, "stop").finish(), &config)?)?;
/// assert_eq!(tracker.millis_in_session(3500), Some(2500));
/// assert_eq!(tracker.span_secs(), 2.5);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct SessionTracker {
    session_id: Option<u32>,
    sessions: u32,
    packets: u64,
    earliest_millis: Option<u64>,
    latest_millis: Option<u64>,
    open_test: Option<PendingTest>,
    last_value_millis: BTreeMap<String, u64>,
    row_counts: BTreeMap<String, u64>,
    tests: Vec<TestRange>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Earliest packet start time of the current session.
    pub fn earliest_millis(&self) -> Option<u64> {
        self.earliest_millis
    }

    /// Latest packet end time of the current session.
    pub fn latest_millis(&self) -> Option<u64> {
        self.latest_millis
    }

    /// Name of the open test, if any.
    pub fn open_test(&self) -> Option<&str> {
        self.open_test.as_ref().map(|t| t.name.as_str())
    }

    /// Completed tests of all sessions, in completion order.
    pub fn tests(&self) -> &[TestRange] {
        &self.tests
    }

    /// Rows seen per channel id, across sessions.
    pub fn row_counts(&self) -> &BTreeMap<String, u64> {
        &self.row_counts
    }

    /// Device time relative to the session's earliest timestamp.
    ///
    /// Negative for times before the earliest packet seen so far.
    pub fn millis_in_session(&self, time_millis: u64) -> Option<i64> {
        self.earliest_millis
            .map(|earliest| time_millis as i64 - earliest as i64)
    }

    /// Session span in seconds, 0 before any values arrived.
    pub fn span_secs(&self) -> f64 {
        match (self.earliest_millis, self.latest_millis) {
            (Some(earliest), Some(latest)) => latest.saturating_sub(earliest) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    /// Process the next packet.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A channel goes back in time relative to the previous packet
    /// - Test markers are not properly paired
    ///
    /// A rejected packet leaves no trace: counts, span, channel ordering
    /// and tests stay as they were. Only a session restart it signals is
    /// kept, so `session_id()` tells whether the device restarted.
    pub fn process(&mut self, packet: &ParsedLogPacket) -> Result<TrackerUpdate, SessionError> {
        let mut update = TrackerUpdate::default();

        match self.session_id {
            None => {
                info!("Session id: {:08x}", packet.session_id());
                self.session_id = Some(packet.session_id());
                self.sessions = 1;
            }
            Some(current) if current != packet.session_id() => {
                info!(
                    "Session changed from {:08x} to {:08x}, device restarted",
                    current,
                    packet.session_id()
                );
                self.reset_session(packet.session_id());
                update.session_reset = true;
            }
            Some(_) => {}
        }

        for channel in packet.channels() {
            if let (Some(&last), Some(next)) = (
                self.last_value_millis.get(channel.channel_id()),
                channel.start_time_millis(),
            ) {
                if next < last {
                    return Err(SessionError::OutOfOrder {
                        channel: channel.channel_id().to_string(),
                        last,
                        next,
                    });
                }
            }
        }

        let earliest = match (self.earliest_millis, packet.start_time_millis()) {
            (Some(earliest), Some(start)) => Some(earliest.min(start)),
            (earliest, start) => earliest.or(start),
        };

        let mut open_test = self.open_test.clone();
        if let Some(markers) = packet.channel(MARKER_CHANNEL_ID) {
            for value in markers.values() {
                if let ChannelValue::Marker(marker) = value {
                    let at_ms = earliest.map_or(0, |earliest| marker.time_millis as i64 - earliest as i64);
                    if let Some(test) = on_marker(&mut open_test, &marker.marker_type, &marker.marker_value, at_ms)? {
                        update.completed_tests.push(test);
                    }
                }
            }
        }

        self.packets += 1;
        if earliest != self.earliest_millis {
            if let Some(start) = earliest {
                info!("Session base time millis: {}", start);
            }
            self.earliest_millis = earliest;
        }
        if let Some(end) = packet.end_time_millis() {
            if self.latest_millis.map_or(true, |latest| end > latest) {
                self.latest_millis = Some(end);
            }
        }

        for channel in packet.channels() {
            if let Some(end) = channel.end_time_millis() {
                self.last_value_millis.insert(channel.channel_id().to_string(), end);
            }
            *self.row_counts.entry(channel.channel_id().to_string()).or_insert(0) += channel.len() as u64;
        }

        self.open_test = open_test;
        for test in &update.completed_tests {
            info!("Test [{}] ended at {} ms", test.name, test.end_ms);
            self.tests.push(test.clone());
        }

        Ok(update)
    }

    /// End of stream.
    ///
    /// # Errors
    ///
    /// Returns `MissingTestEnd` if a test is still open.
    pub fn finish(self) -> Result<TrackerSummary, SessionError> {
        if let Some(open) = self.open_test {
            return Err(SessionError::MissingTestEnd {
                name: open.name,
                start_ms: open.start_ms,
            });
        }

        let span_secs = self.span_secs();
        Ok(TrackerSummary {
            session_id: self.session_id,
            sessions: self.sessions,
            packets: self.packets,
            span_secs,
            row_counts: self.row_counts,
            tests: self.tests,
        })
    }

    fn reset_session(&mut self, session_id: u32) {
        if let Some(open) = self.open_test.take() {
            warn!(
                "Discarding open test [{}] started at {} ms of the previous session",
                open.name, open.start_ms
            );
        }
        self.session_id = Some(session_id);
        self.sessions += 1;
        self.earliest_millis = None;
        self.latest_millis = None;
        self.last_value_millis.clear();
    }
}

/// Apply a test marker to the open test.
fn on_marker(
    open_test: &mut Option<PendingTest>,
    marker_type: &str,
    marker_value: &str,
    at_ms: i64,
) -> Result<Option<TestRange>, SessionError> {
    match marker_type {
        TEST_BEGIN_MARKER => {
            if marker_value.is_empty() {
                return Err(SessionError::EmptyTestName { at_ms });
            }
            if let Some(open) = open_test {
                return Err(SessionError::DanglingTestStart {
                    open: open.name.clone(),
                    new: marker_value.to_string(),
                    at_ms,
                });
            }
            info!("Test [{}] started at {} ms", marker_value, at_ms);
            *open_test = Some(PendingTest {
                name: marker_value.to_string(),
                start_ms: at_ms,
            });
            Ok(None)
        }
        TEST_END_MARKER => match open_test.take() {
            None => Err(SessionError::UnmatchedTestEnd {
                name: marker_value.to_string(),
                at_ms,
            }),
            Some(open) if open.name != marker_value => Err(SessionError::TestNameMismatch {
                expected: open.name,
                found: marker_value.to_string(),
            }),
            Some(open) => Ok(Some(TestRange {
                name: open.name,
                start_ms: open.start_ms,
                end_ms: at_ms,
            })),
        },
        _ => {
            debug!("Marker [{}:{}] at {} ms", marker_type, marker_value, at_ms);
            Ok(None)
        }
    }
}
