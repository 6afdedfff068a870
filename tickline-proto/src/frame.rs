//! Frame and Message types, and their little-endian wire encoding.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

/// No real message carries anywhere near this many frames; a declared count
/// above it is corruption or an attacker, not a legitimate peer, and is
/// rejected before any allocation sized by it.
pub const MAX_FRAME_COUNT: u32 = 1 << 20;

/// An opaque byte run within a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(pub Vec<u8>);

impl Frame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<u32> for Frame {
    fn from(tag: u32) -> Self {
        Self(tag.to_le_bytes().to_vec())
    }
}

/// The frame-0 message-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Control = 1,
    Data = 2,
    Service = 3,
    Event = 4,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Control),
            2 => Some(Self::Data),
            3 => Some(Self::Service),
            4 => Some(Self::Event),
            _ => None,
        }
    }
}

/// An ordered sequence of [`Frame`]s. Frame 0 of every application message is
/// a `u32` [`MessageType`] tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message(pub Vec<Frame>);

impl Message {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self(frames)
    }

    pub fn control(json: &str) -> Self {
        Self(vec![Frame::from(MessageType::Control as u32), Frame::from(json)])
    }

    pub fn data(ticker: &str, tick_bytes: Vec<u8>) -> Self {
        Self(vec![
            Frame::from(MessageType::Data as u32),
            Frame::from(ticker),
            Frame::from(tick_bytes),
        ])
    }

    pub fn service(sub_type: u32) -> Self {
        Self(vec![
            Frame::from(MessageType::Service as u32),
            Frame::from(sub_type),
        ])
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.0.get(index)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        let tag_bytes = self.frame(0)?.as_bytes();
        let tag = u32::from_le_bytes(tag_bytes.try_into().ok()?);
        MessageType::from_u32(tag)
    }

    /// Serializes into a single contiguous buffer: `u32` frame count, then
    /// per frame `u32` length + bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.0.len() as u32)
            .expect("writing to a Vec never fails");
        for frame in &self.0 {
            buf.write_u32::<LittleEndian>(frame.0.len() as u32)
                .expect("writing to a Vec never fails");
            buf.extend_from_slice(&frame.0);
        }
        buf
    }

    /// Parses a complete, self-contained buffer produced by [`Message::encode`].
    pub fn decode(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        let frame_count = bytes
            .read_u32::<LittleEndian>()
            .map_err(|_| ProtocolError::MalformedFrame("truncated frame count".into()))?;
        if frame_count > MAX_FRAME_COUNT || frame_count as usize > bytes.len() / 4 {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame count {frame_count} exceeds what the buffer can hold"
            )));
        }
        let mut frames = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            let len = bytes
                .read_u32::<LittleEndian>()
                .map_err(|_| ProtocolError::MalformedFrame("truncated frame length".into()))?
                as usize;
            if bytes.len() < len {
                return Err(ProtocolError::MalformedFrame(
                    "frame shorter than its declared length".into(),
                ));
            }
            let (frame_bytes, rest) = bytes.split_at(len);
            frames.push(Frame(frame_bytes.to_vec()));
            bytes = rest;
        }
        Ok(Self(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_round_trip_scenario() {
        let msg = Message::new(vec![
            Frame::new(vec![1, 2, 3, 4]),
            Frame::new(vec![5, 6]),
        ]);
        let encoded = msg.encode();
        assert_eq!(
            encoded,
            vec![
                0x02, 0x00, 0x00, 0x00, // frame_count = 2
                0x04, 0x00, 0x00, 0x00, 1, 2, 3, 4, // frame 0
                0x02, 0x00, 0x00, 0x00, 5, 6, // frame 1
            ]
        );

        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let bytes = vec![0x01, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 1, 2];
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_frame_count_the_buffer_cannot_hold() {
        let bytes = 0xFFFF_FFFFu32.to_le_bytes().to_vec();
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn message_type_reads_frame_zero_tag() {
        let msg = Message::control("{}");
        assert_eq!(msg.message_type(), Some(MessageType::Control));
    }
}
