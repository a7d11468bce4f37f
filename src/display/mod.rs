//! # Display Module
//!
//! Bounded per-series time windows for live monitoring.
//!
//! Each [`DisplaySeries`] holds `(time, value)` points in time order, times
//! in seconds since the session start. [`DisplayBuffers`] maps calibrated
//! packet values onto named series:
//!
//! | Channel | Series |
//! |---|---|
//! | load cell `lcN` | `lcN` grams |
//! | power `pwN` | `pwN.volts`, `pwN.amps` |
//! | temperature `tmN` | `tmN` °C |
//! | external report `name:value` | `ext.name` |
//!
//! Series are independent; there are no cross-series invariants.

use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

use crate::error::DisplayError;
use crate::protocol::{ChannelValue, ParsedLogPacket};

/// A bounded, time ordered series of points.
#[derive(Debug, Clone)]
pub struct DisplaySeries {
    times: VecDeque<f64>,
    values: VecDeque<f64>,
    max_points: usize,
    overflowed: bool,
}

impl DisplaySeries {
    /// Creates an empty series holding at most `max_points` points.
    pub fn new(max_points: usize) -> Self {
        Self {
            times: VecDeque::new(),
            values: VecDeque::new(),
            max_points: max_points.max(1),
            overflowed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.values.clear();
    }

    /// Append a block of points.
    ///
    /// Points beyond `max_points` are dropped from the front.
    ///
    /// # Errors
    ///
    /// Returns error if the block is empty, the lengths differ, or any time is
    /// older than the time before it. The series is unchanged on error.
    pub fn extend(&mut self, times: &[f64], values: &[f64]) -> Result<(), DisplayError> {
        if times.is_empty() {
            return Err(DisplayError::EmptyBlock);
        }
        if times.len() != values.len() {
            return Err(DisplayError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }

        let mut last = self.times.back().copied();
        for &t in times {
            if let Some(prev) = last {
                if t < prev {
                    return Err(DisplayError::TimeRegression { last: prev, next: t });
                }
            }
            last = Some(t);
        }

        self.times.extend(times.iter().copied());
        self.values.extend(values.iter().copied());

        let excess = self.times.len().saturating_sub(self.max_points);
        if excess > 0 {
            if !self.overflowed {
                warn!(
                    "Display series exceeded {} points, dropping oldest",
                    self.max_points
                );
                self.overflowed = true;
            }
            self.times.drain(..excess);
            self.values.drain(..excess);
        }
        Ok(())
    }

    /// Drop every point with `time < limit`, returning how many were dropped.
    pub fn delete_older_than(&mut self, limit: f64) -> usize {
        let n = self.times.iter().take_while(|&&t| t < limit).count();
        self.times.drain(..n);
        self.values.drain(..n);
        n
    }

    /// Points with `time <= reference`.
    ///
    /// Points newer than the reference are left out so the scrolling edge of
    /// a plot does not flicker.
    pub fn get_display_window(&self, reference: f64) -> Vec<(f64, f64)> {
        self.times
            .iter()
            .zip(self.values.iter())
            .take_while(|(&t, _)| t - reference <= 0.0)
            .map(|(&t, &v)| (t, v))
            .collect()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Times relative to the newest point (all `<= 0`).
    pub fn relative_times(&self) -> Vec<f64> {
        match self.times.back() {
            Some(&last) => self.times.iter().map(|t| t - last).collect(),
            None => Vec::new(),
        }
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.times.back()?, *self.values.back()?))
    }

    pub fn mean_value(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }
}

/// Copy of one series for readers outside the processing path.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub latest: Option<f64>,
    pub mean: Option<f64>,
}

/// Named display series of a live session.
#[derive(Debug, Clone)]
pub struct DisplayBuffers {
    series: BTreeMap<String, DisplaySeries>,
    window_secs: f64,
    max_points: usize,
}

impl DisplayBuffers {
    pub fn new(window_secs: f64, max_points: usize) -> Self {
        Self {
            series: BTreeMap::new(),
            window_secs,
            max_points,
        }
    }

    pub fn series(&self, name: &str) -> Option<&DisplaySeries> {
        self.series.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(DisplaySeries::is_empty)
    }

    /// Append the displayable values of a packet.
    ///
    /// `session_start_millis` is the device time shown as zero. A series that
    /// would go back in time is cleared and restarted with the new points.
    pub fn ingest(&mut self, packet: &ParsedLogPacket, session_start_millis: u64) -> Result<(), DisplayError> {
        let to_secs = |t: u64| (t as f64 - session_start_millis as f64) / 1000.0;

        let mut blocks: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        let mut push = |name: String, t: u64, v: f64| {
            let (times, values) = blocks.entry(name).or_default();
            times.push(to_secs(t));
            values.push(v);
        };

        for channel in packet.channels() {
            let id = channel.channel_id();
            for value in channel.values() {
                match value {
                    ChannelValue::LoadCell(v) => push(id.to_string(), v.time_millis, v.grams),
                    ChannelValue::Temperature(v) => push(id.to_string(), v.time_millis, v.t_celsius),
                    ChannelValue::Power(v) => {
                        push(format!("{}.volts", id), v.time_millis, v.volts);
                        push(format!("{}.amps", id), v.time_millis, v.amps);
                    }
                    ChannelValue::ExternalReport(v) => push(format!("ext.{}", v.name), v.time_millis, v.value),
                    ChannelValue::Marker(_) => {}
                }
            }
        }

        for (name, (times, values)) in blocks {
            let max_points = self.max_points;
            let series = self
                .series
                .entry(name.clone())
                .or_insert_with(|| DisplaySeries::new(max_points));
            match series.extend(&times, &values) {
                Err(DisplayError::TimeRegression { last, next }) => {
                    warn!("Series [{}] went back in time ({} -> {}), clearing", name, last, next);
                    series.clear();
                    series.extend(&times, &values)?;
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Drop points older than the display window before `now_secs`.
    pub fn prune(&mut self, now_secs: f64) {
        let limit = now_secs - self.window_secs;
        for series in self.series.values_mut() {
            series.delete_older_than(limit);
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    /// Copy every series' display window at `reference_secs`.
    pub fn snapshot(&self, reference_secs: f64) -> Vec<SeriesSnapshot> {
        self.series
            .iter()
            .map(|(name, series)| SeriesSnapshot {
                name: name.clone(),
                points: series.get_display_window(reference_secs),
                latest: series.last().map(|(_, v)| v),
                mean: series.mean_value(),
            })
            .collect()
    }
}
