//! # Log Protocol Module
//!
//! Implementation of the device log packet format.
//!
//! This module handles:
//! - Packet header and channel record decoding
//! - Channel id encodings (3-character tokens, legacy single bytes)
//! - Calibration of numeric samples into typed channel values
//! - Ignored-channel accounting for unconfigured channels
//! - A synthetic encoder for fixtures and tests
//!
//! Payloads arrive already deframed, see [`crate::transport`].

pub mod packet;
pub mod decoder;
pub mod encoder;

pub use decoder::{decode, LogPacketDecoder};
pub use encoder::PacketEncoder;
pub use packet::{
    ChannelData, ChannelFamily, ChannelIdEncoding, ChannelValue, ExternalReportValue,
    LoadCellValue, MarkerValue, ParsedLogPacket, PowerValue, TemperatureValue,
    EXTERNAL_CHANNEL_ID, LOG_PACKET_HEADER_SIZE, LOG_PACKET_VERSION, MARKER_CHANNEL_ID,
};
