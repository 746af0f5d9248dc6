//! Binary frame protocol with length-prefixed messages
//!
//! Frame format:
//! ```text
//! +---------+---------------+------------+
//! | type    | length        | payload    |
//! | (1 byte)| (4 bytes, BE) | (variable) |
//! +---------+---------------+------------+
//! ```
//!
//! Unknown frame types are skipped rather than treated as fatal: a client
//! speaking a newer protocol revision must not get its connection torn down
//! over an event the server does not understand.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Cursor};
use tracing::warn;

/// Frame header size: 1 byte type + 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum frame payload size (64 KiB); chat events are small
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Frame types for every event the engine speaks
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    // Control (0x00 - 0x0F)
    Ping = 0x01,
    Pong = 0x02,
    Goodbye = 0x03,

    // Client -> server events (0x10 - 0x2F)
    Join = 0x10,
    Leave = 0x11,
    Send = 0x12,
    CreateRoom = 0x13,
    ProfileUpdate = 0x14,
    Typing = 0x15,
    GetStats = 0x16,

    // Server -> client events (0x30 - 0x4F)
    Connected = 0x30,
    RoomJoined = 0x31,
    UserJoined = 0x32,
    UserLeft = 0x33,
    Message = 0x34,
    RoomUpdate = 0x35,
    RoomCreated = 0x36,
    RoomDeleted = 0x37,
    StatsUpdate = 0x38,
    UserTyping = 0x39,
    Shutdown = 0x3A,

    // Error (0xFF)
    Error = 0xFF,
}

impl FrameType {
    /// Convert from u8, returns None for unknown types
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FrameType::Ping),
            0x02 => Some(FrameType::Pong),
            0x03 => Some(FrameType::Goodbye),

            0x10 => Some(FrameType::Join),
            0x11 => Some(FrameType::Leave),
            0x12 => Some(FrameType::Send),
            0x13 => Some(FrameType::CreateRoom),
            0x14 => Some(FrameType::ProfileUpdate),
            0x15 => Some(FrameType::Typing),
            0x16 => Some(FrameType::GetStats),

            0x30 => Some(FrameType::Connected),
            0x31 => Some(FrameType::RoomJoined),
            0x32 => Some(FrameType::UserJoined),
            0x33 => Some(FrameType::UserLeft),
            0x34 => Some(FrameType::Message),
            0x35 => Some(FrameType::RoomUpdate),
            0x36 => Some(FrameType::RoomCreated),
            0x37 => Some(FrameType::RoomDeleted),
            0x38 => Some(FrameType::StatsUpdate),
            0x39 => Some(FrameType::UserTyping),
            0x3A => Some(FrameType::Shutdown),

            0xFF => Some(FrameType::Error),
            _ => None,
        }
    }

    /// Check if this frame type is a control message
    pub fn is_control(&self) -> bool {
        (*self as u8) < 0x10
    }

    /// Check if this frame type is a client event
    pub fn is_client_event(&self) -> bool {
        let val = *self as u8;
        (0x10..0x30).contains(&val)
    }

    /// Check if this frame type is a server event
    pub fn is_server_event(&self) -> bool {
        let val = *self as u8;
        (0x30..0x50).contains(&val) || val == 0xFF
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

/// Outcome of a single decode step over a streaming buffer
enum DecodeStep {
    /// Not enough buffered data for a complete frame
    Incomplete,
    /// A complete frame of an unknown type was consumed and dropped
    Skipped(u8),
    /// A complete known frame
    Frame(Frame),
}

impl Frame {
    /// Create a new frame with the given type and payload
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Create an empty frame (no payload)
    pub fn empty(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            payload: Bytes::new(),
        }
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u8(self.frame_type as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encode this frame into a new Bytes
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to take one frame off the front of the buffer
    fn decode_step(buf: &mut BytesMut) -> io::Result<DecodeStep> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(DecodeStep::Incomplete);
        }

        // Peek at the header without consuming
        let mut cursor = Cursor::new(&buf[..]);
        let frame_type_byte = cursor.get_u8();
        let payload_len = cursor.get_u32() as usize;

        // An oversized length means the stream is corrupt, not just ahead of us
        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame payload too large: {} bytes (max: {})",
                    payload_len, MAX_FRAME_SIZE
                ),
            ));
        }

        let total_size = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < total_size {
            return Ok(DecodeStep::Incomplete);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        match FrameType::from_u8(frame_type_byte) {
            Some(frame_type) => Ok(DecodeStep::Frame(Frame {
                frame_type,
                payload,
            })),
            None => Ok(DecodeStep::Skipped(frame_type_byte)),
        }
    }

    /// Decode a single frame from a complete buffer (no streaming)
    pub fn decode_complete(data: &[u8]) -> io::Result<Frame> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Incomplete frame header",
            ));
        }

        let frame_type_byte = data[0];
        let payload_len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;

        let frame_type = FrameType::from_u8(frame_type_byte).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown frame type: 0x{:02X}", frame_type_byte),
            )
        })?;

        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame payload too large: {} bytes (max: {})",
                    payload_len, MAX_FRAME_SIZE
                ),
            ));
        }

        let expected_len = FRAME_HEADER_SIZE + payload_len;
        if data.len() < expected_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Incomplete frame: expected {} bytes, got {}",
                    expected_len,
                    data.len()
                ),
            ));
        }

        let payload = Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..expected_len]);

        Ok(Frame {
            frame_type,
            payload,
        })
    }
}

/// Frame encoder/decoder for streaming use
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed data into the codec
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next known frame, skipping over unknown types
    pub fn decode_next(&mut self) -> io::Result<Option<Frame>> {
        loop {
            match Frame::decode_step(&mut self.buffer)? {
                DecodeStep::Incomplete => return Ok(None),
                DecodeStep::Skipped(type_byte) => {
                    warn!("skipping frame with unknown type 0x{:02X}", type_byte);
                }
                DecodeStep::Frame(frame) => return Ok(Some(frame)),
            }
        }
    }

    /// Get the current buffer length
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_roundtrip() {
        let types = [
            FrameType::Ping,
            FrameType::Goodbye,
            FrameType::Join,
            FrameType::Send,
            FrameType::CreateRoom,
            FrameType::GetStats,
            FrameType::Connected,
            FrameType::RoomDeleted,
            FrameType::Shutdown,
            FrameType::Error,
        ];

        for frame_type in types {
            let byte = frame_type as u8;
            let recovered = FrameType::from_u8(byte).unwrap();
            assert_eq!(frame_type, recovered);
        }
    }

    #[test]
    fn test_frame_encode_decode() {
        let original = Frame::new(FrameType::Send, "{\"text\":\"hi\"}");
        let encoded = original.encode_to_bytes();

        let decoded = Frame::decode_complete(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_codec_streaming_partial_feeds() {
        let mut codec = FrameCodec::new();

        let frame1 = Frame::new(FrameType::Ping, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let frame2 = Frame::new(FrameType::Pong, vec![9, 10, 11, 12, 13, 14, 15, 16]);

        let mut data = BytesMut::new();
        frame1.encode(&mut data);
        frame2.encode(&mut data);

        // Feed a sliver that doesn't even cover the header
        codec.feed(&data[..3]);
        assert!(codec.decode_next().unwrap().is_none());

        codec.feed(&data[3..]);
        assert_eq!(codec.decode_next().unwrap().unwrap(), frame1);
        assert_eq!(codec.decode_next().unwrap().unwrap(), frame2);
        assert!(codec.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_codec_skips_unknown_type() {
        let mut codec = FrameCodec::new();

        // A well-formed frame with a type byte we don't speak, followed by a
        // known frame; the known frame must still come out.
        let mut data = BytesMut::new();
        data.put_u8(0xAB);
        data.put_u32(2);
        data.put_slice(&[0, 0]);
        Frame::new(FrameType::Leave, "{}").encode(&mut data);

        codec.feed(&data);
        let frame = codec.decode_next().unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Leave);
        assert!(codec.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_frame_type_categories() {
        assert!(FrameType::Ping.is_control());
        assert!(!FrameType::Join.is_control());

        assert!(FrameType::Join.is_client_event());
        assert!(FrameType::Typing.is_client_event());
        assert!(!FrameType::Connected.is_client_event());

        assert!(FrameType::RoomJoined.is_server_event());
        assert!(FrameType::Error.is_server_event());
        assert!(!FrameType::Leave.is_server_event());
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty(FrameType::GetStats);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.encoded_size(), FRAME_HEADER_SIZE);

        let encoded = frame.encode_to_bytes();
        let decoded = Frame::decode_complete(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_frame_too_large() {
        let mut data = BytesMut::new();
        data.put_u8(FrameType::Send as u8);
        data.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let mut codec = FrameCodec::new();
        codec.feed(&data);
        assert!(codec.decode_next().is_err());
    }
}
