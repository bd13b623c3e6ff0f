//! Audio packet wire format.
//!
//! Each packet is a 16-byte little-endian header followed by the
//! interleaved stereo `i16` payload:
//!
//! ```text
//! offset  size  field
//!      0     4  magic "MCAP"
//!      4     4  frame_count (stereo frames in the payload)
//!      8     8  timestamp_ms
//!     16     *  frame_count * 2 samples, i16 LE, L/R interleaved
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::TARGET_CHANNELS;

/// Tag at the start of every audio packet.
pub const AUDIO_PACKET_MAGIC: [u8; 4] = *b"MCAP";

/// Header preceding each audio packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacketHeader {
    /// Number of stereo frames in the payload.
    pub frame_count: u32,

    /// Capture timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl AudioPacketHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 16;

    /// Payload size in bytes announced by this header.
    pub fn payload_len(&self) -> usize {
        self.frame_count as usize * TARGET_CHANNELS as usize * std::mem::size_of::<i16>()
    }

    /// Parse a header from the start of `data`.
    ///
    /// Returns `None` if `data` is shorter than a header or the magic does
    /// not match.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || data[..4] != AUDIO_PACKET_MAGIC {
            return None;
        }

        let mut buf = &data[4..Self::SIZE];
        Some(Self {
            frame_count: buf.get_u32_le(),
            timestamp_ms: buf.get_u64_le(),
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&AUDIO_PACKET_MAGIC);
        buf.put_u32_le(self.frame_count);
        buf.put_u64_le(self.timestamp_ms);
    }
}

/// Assembles header-tagged packets, reusing one allocation across calls.
#[derive(Debug, Default)]
pub struct PacketBuilder {
    buf: BytesMut,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one packet for interleaved stereo `samples`.
    ///
    /// The returned slice is valid until the next call.
    pub fn build(&mut self, samples: &[i16], timestamp_ms: u64) -> &[u8] {
        let header = AudioPacketHeader {
            frame_count: (samples.len() / TARGET_CHANNELS as usize) as u32,
            timestamp_ms,
        };

        self.buf.clear();
        self.buf.reserve(AudioPacketHeader::SIZE + header.payload_len());
        header.write(&mut self.buf);
        for &sample in samples {
            self.buf.put_i16_le(sample);
        }

        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut builder = PacketBuilder::new();
        let packet = builder.build(&[1, -1, 256, -256], 0x0102_0304_0506_0708);

        assert_eq!(&packet[..4], b"MCAP");
        assert_eq!(&packet[4..8], &2u32.to_le_bytes());
        assert_eq!(&packet[8..16], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&packet[16..], &[1, 0, 0xFF, 0xFF, 0, 1, 0, 0xFF]);
    }

    #[test]
    fn test_parse_reads_back_header() {
        let mut builder = PacketBuilder::new();
        let samples = vec![0i16; 960 * 2];
        let packet = builder.build(&samples, 12_345);

        let header = AudioPacketHeader::parse(&packet).unwrap();
        assert_eq!(header.frame_count, 960);
        assert_eq!(header.timestamp_ms, 12_345);
        assert_eq!(packet.len(), AudioPacketHeader::SIZE + header.payload_len());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(AudioPacketHeader::parse(&[0u8; 8]).is_none());

        let mut bogus = [0u8; 16];
        bogus[..4].copy_from_slice(b"NOPE");
        assert!(AudioPacketHeader::parse(&bogus).is_none());
    }

    #[test]
    fn test_builder_reuse_clears_previous_packet() {
        let mut builder = PacketBuilder::new();
        let first_len = builder.build(&[7; 8], 1).len();
        let second = builder.build(&[3; 2], 2);
        assert_eq!(first_len, 16 + 16);
        assert_eq!(second.len(), 16 + 4);
        assert_eq!(AudioPacketHeader::parse(second).unwrap().frame_count, 1);
    }
}
