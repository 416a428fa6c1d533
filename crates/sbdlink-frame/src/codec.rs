use bytes::{BufMut, Bytes, BytesMut};
use sbdlink_proto::ProtocolVersion;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::origin::OriginId;

/// Frame header: sequence (4) + fragment index (1) + fragment count (1) +
/// version tag (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// The fragment count is a single byte on the wire.
pub const MAX_FRAGMENTS_CEILING: usize = u8::MAX as usize;

/// Default fragment limit per message. Each fragment is a billed transmission.
pub const DEFAULT_MAX_FRAGMENTS: usize = 8;

/// One channel transmission unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device the block came from (inbound) or is addressed to (outbound).
    pub origin: OriginId,
    /// Message sequence shared by every fragment of one message.
    pub sequence: u32,
    pub fragment_index: u8,
    pub fragment_count: u8,
    /// Protocol version of the packet carried by the reassembled fragments.
    pub version: ProtocolVersion,
    pub payload: Bytes,
}

impl Frame {
    /// Whether this frame alone completes its message.
    pub fn is_whole(&self) -> bool {
        self.fragment_count == 1
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame header and chunk into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────┬────────────┬─────────────┬──────────────┐
/// │ Sequence     │ Frag index │ Frag count │ Version tag │ Chunk        │
/// │ (4B LE)      │ (1B)       │ (1B)       │ (1B) 1 / 2  │ (rest)       │
/// └──────────────┴────────────┴────────────┴─────────────┴──────────────┘
/// ```
pub fn encode_frame(
    sequence: u32,
    fragment_index: u8,
    fragment_count: u8,
    version: ProtocolVersion,
    chunk: &[u8],
    dst: &mut BytesMut,
) {
    dst.reserve(HEADER_SIZE + chunk.len());
    dst.put_u32_le(sequence);
    dst.put_u8(fragment_index);
    dst.put_u8(fragment_count);
    dst.put_u8(version.tag());
    dst.put_slice(chunk);
}

/// Decode one framed SBD block.
///
/// A block is always exactly one frame, so everything after the header is the
/// chunk.
pub fn decode_frame(origin: OriginId, block: &Bytes) -> Result<Frame> {
    if block.len() < HEADER_SIZE {
        return Err(FrameError::Truncated { len: block.len() });
    }

    let sequence = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
    let fragment_index = block[4];
    let fragment_count = block[5];
    let version =
        ProtocolVersion::from_tag(block[6]).ok_or(FrameError::UnknownVersionTag(block[6]))?;

    if fragment_count == 0 {
        return Err(FrameError::ZeroFragmentCount);
    }
    if fragment_index >= fragment_count {
        return Err(FrameError::FragmentIndexOutOfRange {
            index: fragment_index,
            count: fragment_count,
        });
    }

    Ok(Frame {
        origin,
        sequence,
        fragment_index,
        fragment_count,
        version,
        payload: block.slice(HEADER_SIZE..),
    })
}

/// How messages are laid out in SBD blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    /// Frame header plus fragmentation.
    #[default]
    Framed,
    /// Whole MAVLink packets with no header; one or more per block.
    Raw,
}

/// Maximum block sizes of the supported modem families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModemPreset {
    /// RockBLOCK 9603: 270-byte mobile-terminated ceiling.
    #[serde(rename = "9603")]
    Rock9603,
    /// RockBLOCK 9704 (IMT): kept to one 1024-byte segment.
    #[serde(rename = "9704")]
    Rock9704,
}

impl ModemPreset {
    pub const fn max_block_size(self) -> usize {
        match self {
            ModemPreset::Rock9603 => 270,
            ModemPreset::Rock9704 => 1024,
        }
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest block the channel carries, header included. Default: 270 (9603).
    pub max_block_size: usize,
    /// Most fragments one message may use. Default: 8.
    pub max_fragments: usize,
    pub wire_mode: WireMode,
}

impl FrameConfig {
    pub fn for_modem(preset: ModemPreset) -> Self {
        Self {
            max_block_size: preset.max_block_size(),
            ..Self::default()
        }
    }

    /// Payload bytes per frame after the header.
    pub fn chunk_size(&self) -> usize {
        match self.wire_mode {
            WireMode::Framed => self.max_block_size.saturating_sub(HEADER_SIZE),
            WireMode::Raw => self.max_block_size,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_block_size: ModemPreset::Rock9603.max_block_size(),
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            wire_mode: WireMode::Framed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> OriginId {
        OriginId::new("300234010753370")
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(0xA1B2_C3D4, 1, 3, ProtocolVersion::V2, b"chunk", &mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 5);
        assert_eq!(&buf[..4], &[0xD4, 0xC3, 0xB2, 0xA1]);

        let frame = decode_frame(origin(), &buf.freeze()).unwrap();
        assert_eq!(frame.sequence, 0xA1B2_C3D4);
        assert_eq!(frame.fragment_index, 1);
        assert_eq!(frame.fragment_count, 3);
        assert_eq!(frame.version, ProtocolVersion::V2);
        assert_eq!(frame.payload.as_ref(), b"chunk");
        assert_eq!(frame.wire_size(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_decode_short_block() {
        let block = Bytes::from_static(&[1, 0, 0, 0, 0, 1]);
        assert_eq!(
            decode_frame(origin(), &block),
            Err(FrameError::Truncated { len: 6 })
        );
    }

    #[test]
    fn test_decode_unknown_version_tag() {
        let block = Bytes::from_static(&[1, 0, 0, 0, 0, 1, 9]);
        assert_eq!(
            decode_frame(origin(), &block),
            Err(FrameError::UnknownVersionTag(9))
        );
    }

    #[test]
    fn test_decode_index_out_of_range() {
        let block = Bytes::from_static(&[1, 0, 0, 0, 2, 2, 1, 0xAA]);
        assert_eq!(
            decode_frame(origin(), &block),
            Err(FrameError::FragmentIndexOutOfRange { index: 2, count: 2 })
        );

        let zero = Bytes::from_static(&[1, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            decode_frame(origin(), &zero),
            Err(FrameError::ZeroFragmentCount)
        );
    }

    #[test]
    fn test_chunk_size_per_mode() {
        let framed = FrameConfig::for_modem(ModemPreset::Rock9704);
        assert_eq!(framed.chunk_size(), 1024 - HEADER_SIZE);

        let raw = FrameConfig {
            wire_mode: WireMode::Raw,
            ..FrameConfig::default()
        };
        assert_eq!(raw.chunk_size(), 270);
    }
}
