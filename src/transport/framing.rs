//! # Frame Decoder
//!
//! HDLC-style byte stuffing between the device and the host.
//!
//! ```text
//! 0x7C  type:u8 data[..] crc16:u16  0x7E
//! ```
//!
//! Inside a frame, `0x7C`, `0x7D` and `0x7E` are sent as `0x7D` followed by
//! the byte XOR `0x20`. The CRC covers type and data, big-endian.

use serde::Serialize;
use tracing::{trace, warn};

use super::crc::crc16_ccitt;

/// Frame start flag
pub const START_FLAG: u8 = 0x7C;

/// Frame end flag
pub const END_FLAG: u8 = 0x7E;

/// Escape byte
pub const ESCAPE: u8 = 0x7D;

/// XOR mask of escaped bytes
const ESCAPE_XOR: u8 = 0x20;

/// Maximum unstuffed frame length (type + data + crc)
pub const MAX_FRAME_LEN: usize = 1024;

/// Minimum unstuffed frame length (type + crc)
pub const MIN_FRAME_LEN: usize = 3;

/// Frame types
pub const FRAME_TYPE_COMMAND: u8 = 1;
pub const FRAME_TYPE_RESPONSE: u8 = 2;
pub const FRAME_TYPE_MESSAGE: u8 = 3;
pub const FRAME_TYPE_LOG: u8 = 4;

/// A checked, unstuffed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn is_log(&self) -> bool {
        self.frame_type == FRAME_TYPE_LOG
    }
}

/// Deframing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Bytes pushed into the decoder.
    pub bytes: u64,
    /// Frames that passed all checks.
    pub frames: u64,
    /// Frames dropped for any reason.
    pub dropped: u64,
    /// Of the dropped frames, those with a CRC mismatch.
    pub bad_crc: u64,
    /// Bytes seen outside any frame.
    pub skipped_bytes: u64,
}

/// Streaming frame decoder.
///
/// Bytes may be pushed in chunks of any size; a frame split across pushes is
/// completed by a later push. Invalid frames are dropped and counted, and the
/// decoder resynchronizes on the next start flag.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    pending_escape: bool,
    stats: FrameStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_FRAME_LEN),
            in_frame: false,
            pending_escape: false,
            stats: FrameStats::default(),
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Discard any partial frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.reset_frame(false);
    }

    /// Push received bytes, returning every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Push a single byte.
    pub fn push_byte(&mut self, b: u8) -> Option<Frame> {
        self.stats.bytes += 1;

        if !self.in_frame {
            if b == START_FLAG {
                self.reset_frame(true);
            } else {
                self.stats.skipped_bytes += 1;
            }
            return None;
        }

        if b == START_FLAG {
            self.drop_frame("premature start flag");
            self.reset_frame(true);
            return None;
        }

        if b == END_FLAG {
            let frame = self.finish_frame();
            self.reset_frame(false);
            return frame;
        }

        if self.buf.len() >= MAX_FRAME_LEN {
            self.drop_frame("frame overrun");
            self.reset_frame(false);
            return None;
        }

        if self.pending_escape {
            let unescaped = b ^ ESCAPE_XOR;
            if !matches!(unescaped, START_FLAG | END_FLAG | ESCAPE) {
                self.drop_frame("invalid byte after escape");
                self.reset_frame(false);
                return None;
            }
            self.buf.push(unescaped);
            self.pending_escape = false;
            return None;
        }

        if b == ESCAPE {
            self.pending_escape = true;
            return None;
        }

        self.buf.push(b);
        None
    }

    fn reset_frame(&mut self, in_frame: bool) {
        self.buf.clear();
        self.in_frame = in_frame;
        self.pending_escape = false;
    }

    fn drop_frame(&mut self, reason: &str) {
        warn!("Dropping frame: {} ({} bytes)", reason, self.buf.len());
        self.stats.dropped += 1;
    }

    fn finish_frame(&mut self) -> Option<Frame> {
        // Back to back flags are used as a pre-frame marker.
        if self.buf.is_empty() && !self.pending_escape {
            return None;
        }

        if self.pending_escape {
            self.drop_frame("pending escape at end flag");
            return None;
        }

        if self.buf.len() < MIN_FRAME_LEN {
            self.drop_frame("frame too short");
            return None;
        }

        let crc_index = self.buf.len() - 2;
        let received = u16::from_be_bytes([self.buf[crc_index], self.buf[crc_index + 1]]);
        let computed = crc16_ccitt(&self.buf[..crc_index]);
        if received != computed {
            warn!("Frame CRC mismatch: received 0x{:04X}, computed 0x{:04X}", received, computed);
            self.stats.bad_crc += 1;
            self.stats.dropped += 1;
            return None;
        }

        self.stats.frames += 1;
        let frame = Frame {
            frame_type: self.buf[0],
            data: self.buf[1..crc_index].to_vec(),
        };
        trace!("Frame type {} with {} data bytes", frame.frame_type, frame.data.len());
        Some(frame)
    }
}

/// Encode a complete stuffed frame.
///
/// # Arguments
///
/// * `frame_type` - Frame type byte
/// * `data` - Frame data
///
/// # Returns
///
/// * `Vec<u8>` - Start flag, stuffed type + data + crc, end flag
///
/// # Examples
///
/// ```
/// use daq_telemetry::transport::{encode_frame, FrameDecoder, FRAME_TYPE_LOG};
///
/// let bytes = encode_frame(FRAME_TYPE_LOG, &[1, 0x7C, 2]);
/// let frames = FrameDecoder::new().push(&bytes);
/// assert_eq!(frames[0].data, vec![1, 0x7C, 2]);
/// ```
pub fn encode_frame(frame_type: u8, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 3);
    body.push(frame_type);
    body.extend_from_slice(data);
    let crc = crc16_ccitt(&body);
    body.extend_from_slice(&crc.to_be_bytes());

    let mut out = Vec::with_capacity(body.len() + 8);
    out.push(START_FLAG);
    for &b in &body {
        if matches!(b, START_FLAG | END_FLAG | ESCAPE) {
            out.push(ESCAPE);
            out.push(b ^ ESCAPE_XOR);
        } else {
            out.push(b);
        }
    }
    out.push(END_FLAG);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_stuffing() {
        let bytes = encode_frame(0x20, &[0xff, 0x00, 0x7c, 0x22, 0x7e, 0x22, 0x7d, 0x99]);
        assert_eq!(
            &bytes[..14],
            &[0x7c, 0x20, 0xff, 0x00, 0x7d, 0x5c, 0x22, 0x7d, 0x5e, 0x22, 0x7d, 0x5d, 0x99, bytes[13]]
        );
        assert_eq!(*bytes.last().unwrap(), END_FLAG);
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&encode_frame(FRAME_TYPE_LOG, &[1, 2, 3]));
        assert_eq!(
            frames,
            vec![Frame {
                frame_type: FRAME_TYPE_LOG,
                data: vec![1, 2, 3]
            }]
        );
        assert!(frames[0].is_log());
        assert_eq!(decoder.stats().frames, 1);
        assert_eq!(decoder.stats().dropped, 0);
    }

    #[test]
    fn test_decode_frame_split_across_pushes() {
        let bytes = encode_frame(FRAME_TYPE_LOG, &[0x7d, 0x7e, 0x7c, 9]);
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(1) {
            frames.extend(decoder.push(chunk));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![0x7d, 0x7e, 0x7c, 9]);
    }

    #[test]
    fn test_empty_data_frame() {
        let frames = FrameDecoder::new().push(&encode_frame(FRAME_TYPE_MESSAGE, &[]));
        assert_eq!(frames[0].frame_type, FRAME_TYPE_MESSAGE);
        assert!(frames[0].data.is_empty());
    }

    #[test]
    fn test_skips_noise_between_frames() {
        let mut bytes = vec![0x00, 0x11, END_FLAG];
        bytes.extend(encode_frame(FRAME_TYPE_LOG, &[5]));
        bytes.extend([0x42, 0x43]);
        bytes.extend(encode_frame(FRAME_TYPE_LOG, &[6]));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(decoder.stats().skipped_bytes, 5);
        assert_eq!(decoder.stats().bytes, bytes.len() as u64);
    }

    #[test]
    fn test_bad_crc_dropped() {
        let mut bytes = encode_frame(FRAME_TYPE_LOG, &[1, 2, 3]);
        bytes[2] ^= 0x01;
        bytes.extend(encode_frame(FRAME_TYPE_LOG, &[4]));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![4]);
        assert_eq!(decoder.stats().bad_crc, 1);
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_premature_start_flag_resyncs() {
        let mut bytes = vec![START_FLAG, FRAME_TYPE_LOG, 1, 2];
        bytes.extend(encode_frame(FRAME_TYPE_LOG, &[7]));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![7]);
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_invalid_escape_dropped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&[START_FLAG, FRAME_TYPE_LOG, ESCAPE, 0x00, 1, 2, END_FLAG]);
        assert!(frames.is_empty());
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_pending_escape_at_end_dropped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&[START_FLAG, 1, 2, 3, ESCAPE, END_FLAG]).is_empty());
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_short_frame_dropped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&[START_FLAG, 1, 2, END_FLAG]).is_empty());
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_back_to_back_flags_ignored() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&[START_FLAG, END_FLAG]).is_empty());
        assert_eq!(decoder.stats().dropped, 0);
    }

    #[test]
    fn test_overrun_dropped() {
        let mut bytes = vec![START_FLAG];
        bytes.extend(std::iter::repeat(0x11).take(MAX_FRAME_LEN + 1));
        bytes.push(END_FLAG);
        bytes.extend(encode_frame(FRAME_TYPE_LOG, &[8]));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.stats().dropped, 1);
    }

    #[test]
    fn test_max_size_frame_accepted() {
        let data = vec![0x33; MAX_FRAME_LEN - 3];
        let frames = FrameDecoder::new().push(&encode_frame(FRAME_TYPE_LOG, &data));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.len(), MAX_FRAME_LEN - 3);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let bytes = encode_frame(FRAME_TYPE_LOG, &[1, 2, 3]);
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..4]).is_empty());
        decoder.reset();
        assert!(decoder.push(&bytes[4..]).is_empty());
        assert_eq!(decoder.push(&bytes).len(), 1);
    }
}
