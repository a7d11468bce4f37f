//! # Transport Module
//!
//! Host side of the device packet transport.
//!
//! This module handles:
//! - Frame synchronization on start and end flags
//! - Byte un-stuffing
//! - CRC-16/CCITT-FALSE validation
//!
//! Only log frames carry telemetry; other frame types are counted and
//! skipped by the consumers.

pub mod crc;
pub mod framing;

pub use framing::{
    encode_frame, Frame, FrameDecoder, FrameStats, FRAME_TYPE_COMMAND, FRAME_TYPE_LOG,
    FRAME_TYPE_MESSAGE, FRAME_TYPE_RESPONSE, MAX_FRAME_LEN,
};
