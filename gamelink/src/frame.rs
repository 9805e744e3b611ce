//! GameLink wire frame: fixed 9-byte header plus a length-delimited payload.
//!
//! Binary layout (all fields big-endian):
//!
//! ```text
//! +-------+---------+-------------+---------------+--- payload_len ---+
//! | flags |  seqno  |  timestamp  |  payload_len  |      payload      |
//! | (1B)  |  (2B)   |    (4B)     |     (2B)      |                   |
//! +-------+---------+-------------+---------------+-------------------+
//! ```
//!
//! `flags` bit 0 selects the channel (0 = reliable, 1 = unreliable); bit 1
//! marks an ACK frame, whose payload is always empty. `timestamp` carries the
//! low 32 bits of the sender's wall clock in milliseconds since the Unix
//! epoch; see [`reconstruct_millis`] for recovery on the receiving side.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GameLinkError, Result};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 9;
/// Largest payload expressible in the 2-byte length field.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Flags carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: Self = Self(0x00);
    /// Bit 0: frame belongs to the unreliable channel.
    pub const UNRELIABLE: Self = Self(0x01);
    /// Bit 1: frame is a cumulative acknowledgement (empty payload).
    pub const ACK: Self = Self(0x02);

    /// Mask of all defined bits; anything outside is a malformed header.
    pub const KNOWN_MASK: u8 = 0x03;

    pub fn contains(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

/// The two logical channels multiplexed over one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Reliable => write!(f, "reliable"),
            Channel::Unreliable => write!(f, "unreliable"),
        }
    }
}

/// A single wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: FrameFlags,
    pub seqno: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Build a data frame for the given channel.
    ///
    /// Fails if the payload does not fit the 2-byte length field.
    pub fn data(channel: Channel, seqno: u16, timestamp: u32, payload: Bytes) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(GameLinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        let flags = match channel {
            Channel::Reliable => FrameFlags::NONE,
            Channel::Unreliable => FrameFlags::UNRELIABLE,
        };
        Ok(Self {
            flags,
            seqno,
            timestamp,
            payload,
        })
    }

    /// Build a cumulative ACK frame acknowledging every seqno up to `ack_seqno`.
    pub fn ack(ack_seqno: u16, timestamp: u32) -> Self {
        Self {
            flags: FrameFlags::ACK,
            seqno: ack_seqno,
            timestamp,
            payload: Bytes::new(),
        }
    }

    /// The channel this frame travels on.
    pub fn channel(&self) -> Channel {
        if self.flags.contains(FrameFlags::UNRELIABLE) {
            Channel::Unreliable
        } else {
            Channel::Reliable
        }
    }

    /// Whether the ACK bit is set. The bit is authoritative: ACK frames share
    /// stream 0 with data frames and are distinguished by it alone.
    pub fn is_ack(&self) -> bool {
        self.flags.contains(FrameFlags::ACK)
    }

    /// The total number of bytes this frame occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode this frame into a byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.0);
        buf.put_u16(self.seqno);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    /// Decode exactly one frame from a datagram.
    ///
    /// Datagrams preserve message boundaries and carry exactly one frame, so
    /// both a short buffer and trailing bytes are malformed input.
    pub fn decode_one(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(GameLinkError::FrameTooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }
        let flags = data[0];
        if flags & !FrameFlags::KNOWN_MASK != 0 {
            return Err(GameLinkError::UnknownFlags(flags));
        }
        let seqno = u16::from_be_bytes([data[1], data[2]]);
        let timestamp = u32::from_be_bytes([data[3], data[4], data[5], data[6]]);
        let payload_len = u16::from_be_bytes([data[7], data[8]]) as usize;
        let total = HEADER_LEN + payload_len;
        if data.len() != total {
            return Err(GameLinkError::DatagramLengthMismatch {
                expected: total,
                actual: data.len(),
            });
        }
        Ok(Self {
            flags: FrameFlags(flags),
            seqno,
            timestamp,
            payload: Bytes::copy_from_slice(&data[HEADER_LEN..]),
        })
    }

    /// Peel complete frames off the front of a stream reassembly buffer.
    ///
    /// Scans from offset 0, removing `HEADER_LEN + payload_len` bytes per
    /// frame. Stops at the first incomplete frame, leaving the unconsumed
    /// suffix in `buf` to be rejoined with the next stream read; an
    /// incomplete frame is not an error. A header with undefined flag bits
    /// cannot be resynchronized, so the remainder is reported and discarded.
    pub fn decode_stream(buf: &mut BytesMut) -> Vec<Self> {
        let mut frames = Vec::new();
        while buf.len() >= HEADER_LEN {
            let flags = buf[0];
            if flags & !FrameFlags::KNOWN_MASK != 0 {
                tracing::warn!(
                    flags,
                    discarded = buf.len(),
                    "malformed frame header in stream, discarding buffer"
                );
                buf.clear();
                break;
            }
            let payload_len = u16::from_be_bytes([buf[7], buf[8]]) as usize;
            let total = HEADER_LEN + payload_len;
            if buf.len() < total {
                break;
            }
            let mut head = buf.split_to(total);
            let payload = head.split_off(HEADER_LEN).freeze();
            frames.push(Self {
                flags: FrameFlags(flags),
                seqno: u16::from_be_bytes([head[1], head[2]]),
                timestamp: u32::from_be_bytes([head[3], head[4], head[5], head[6]]),
                payload,
            });
        }
        frames
    }
}

/// Current wall clock as milliseconds since the Unix epoch.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Truncate a millisecond wall-clock value to the 4-byte wire field.
pub fn wire_timestamp(now_ms: u64) -> u32 {
    (now_ms & 0xFFFF_FFFF) as u32
}

/// Recover a full millisecond timestamp from its low 32 bits.
///
/// Considers the receiver's current 2^32 ms epoch and its two neighbours and
/// picks the candidate closest to `now_ms`. Correct while peer clocks agree
/// to within ~2^31 ms (about 24.8 days); this is not a clock-sync mechanism.
pub fn reconstruct_millis(wire: u32, now_ms: u64) -> u64 {
    const EPOCH_SPAN: i128 = 1 << 32;
    let base = (now_ms & !0xFFFF_FFFFu64) as i128;
    let wire = wire as i128;
    let now = now_ms as i128;

    let mut best = base + wire;
    for cand in [base - EPOCH_SPAN + wire, base + EPOCH_SPAN + wire] {
        if cand >= 0 && (cand - now).abs() < (best - now).abs() {
            best = cand;
        }
    }
    best as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_roundtrip() {
        let frame = Frame::data(
            Channel::Reliable,
            7,
            123_456,
            Bytes::from_static(b"hello world"),
        )
        .unwrap();
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 11);
        let decoded = Frame::decode_one(&encoded).unwrap();
        assert_eq!(frame, decoded);
        assert_eq!(decoded.channel(), Channel::Reliable);
        assert!(!decoded.is_ack());
    }

    #[test]
    fn unreliable_frame_roundtrip() {
        let frame = Frame::data(Channel::Unreliable, 1, 0, Bytes::from_static(b"pos")).unwrap();
        let decoded = Frame::decode_one(&frame.encode()).unwrap();
        assert_eq!(decoded.channel(), Channel::Unreliable);
        assert_eq!(&decoded.payload[..], b"pos");
    }

    #[test]
    fn ack_frame_roundtrip() {
        let frame = Frame::ack(42, 99);
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = Frame::decode_one(&encoded).unwrap();
        assert!(decoded.is_ack());
        assert_eq!(decoded.seqno, 42);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn empty_payload_roundtrip() {
        let frame = Frame::data(Channel::Reliable, 1, 0, Bytes::new()).unwrap();
        let decoded = Frame::decode_one(&frame.encode()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD + 1]);
        let err = Frame::data(Channel::Reliable, 1, 0, payload).unwrap_err();
        assert!(matches!(err, GameLinkError::PayloadTooLarge { .. }));
    }

    #[test]
    fn decode_one_rejects_short_buffer() {
        let err = Frame::decode_one(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, GameLinkError::FrameTooShort { .. }));
    }

    #[test]
    fn decode_one_rejects_trailing_bytes() {
        let mut encoded = BytesMut::new();
        Frame::ack(1, 0).encode_into(&mut encoded);
        encoded.put_u8(0xFF); // trailing garbage
        let err = Frame::decode_one(&encoded).unwrap_err();
        assert!(matches!(err, GameLinkError::DatagramLengthMismatch { .. }));
    }

    #[test]
    fn decode_one_rejects_unknown_flags() {
        let mut encoded = BytesMut::new();
        Frame::ack(1, 0).encode_into(&mut encoded);
        encoded[0] = 0x80;
        let err = Frame::decode_one(&encoded).unwrap_err();
        assert!(matches!(err, GameLinkError::UnknownFlags(0x80)));
    }

    #[test]
    fn stream_decode_coalesced_frames() {
        let mut buf = BytesMut::new();
        for i in 1..=3u16 {
            Frame::data(Channel::Reliable, i, 10, Bytes::from(format!("m{i}")))
                .unwrap()
                .encode_into(&mut buf);
        }
        let frames = Frame::decode_stream(&mut buf);
        assert_eq!(frames.len(), 3);
        assert!(buf.is_empty());
        assert_eq!(frames[2].seqno, 3);
        assert_eq!(&frames[2].payload[..], b"m3");
    }

    #[test]
    fn stream_decode_keeps_incomplete_tail() {
        let mut buf = BytesMut::new();
        Frame::data(Channel::Reliable, 1, 0, Bytes::from_static(b"whole"))
            .unwrap()
            .encode_into(&mut buf);
        let partial = Frame::data(Channel::Reliable, 2, 0, Bytes::from_static(b"cut off"))
            .unwrap()
            .encode();
        buf.extend_from_slice(&partial[..HEADER_LEN + 3]);

        let frames = Frame::decode_stream(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(buf.len(), HEADER_LEN + 3);

        // Rejoining the rest of the bytes completes the second frame.
        buf.extend_from_slice(&partial[HEADER_LEN + 3..]);
        let frames = Frame::decode_stream(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].seqno, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn stream_decode_short_header_is_remainder() {
        let mut buf = BytesMut::from(&[0u8; 5][..]);
        let frames = Frame::decode_stream(&mut buf);
        assert!(frames.is_empty());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn stream_decode_discards_on_unknown_flags() {
        let mut buf = BytesMut::new();
        Frame::ack(9, 0).encode_into(&mut buf);
        buf.put_u8(0xF0); // start of a malformed header
        buf.put_slice(&[0u8; 10]);

        let frames = Frame::decode_stream(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(buf.is_empty(), "remainder must be discarded");
    }

    #[test]
    fn timestamp_reconstruction_same_epoch() {
        let sender = 5_000_000_123u64;
        let now = sender + 40;
        assert_eq!(reconstruct_millis(wire_timestamp(sender), now), sender);
    }

    #[test]
    fn timestamp_reconstruction_across_wrap_backward() {
        // Sender stamped just before a 2^32 ms boundary, receiver reads just
        // after it: the correct candidate is one epoch below the receiver's.
        let sender = (1u64 << 32) - 400;
        let now = (1u64 << 32) + 100;
        assert_eq!(reconstruct_millis(wire_timestamp(sender), now), sender);
    }

    #[test]
    fn timestamp_reconstruction_across_wrap_forward() {
        // Sender clock slightly ahead, already past the boundary.
        let sender = (1u64 << 32) + 50;
        let now = (1u64 << 32) - 100;
        assert_eq!(reconstruct_millis(wire_timestamp(sender), now), sender);
    }
}
