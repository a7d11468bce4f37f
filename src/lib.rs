//! # DAQ Telemetry Library
//!
//! Host side of a multi-sensor data acquisition instrument.
//!
//! The device streams framed log packets carrying load cell, power and
//! temperature samples plus text markers. This library decodes them,
//! converts raw ADC readings into physical units, tracks sessions and test
//! ranges, and feeds either CSV exports or a live display.
//!
//! Pipeline: [`transport`] frames → [`protocol`] packets (calibrated through
//! [`calibration`]) → [`session`] tracking → [`export`] files or
//! [`monitor`] / [`display`] buffers.

pub mod calibration;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod monitor;
pub mod protocol;
pub mod session;
pub mod transport;
