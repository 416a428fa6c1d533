use sbdlink_proto::WireError;

use crate::origin::OriginId;

/// Errors raised while parsing a single SBD block into a [`Frame`](crate::Frame).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The block is shorter than the frame header.
    #[error("block too short for frame header ({len} bytes)")]
    Truncated { len: usize },

    /// The version tag is not a known protocol version.
    #[error("unknown protocol version tag {0}")]
    UnknownVersionTag(u8),

    /// A frame must belong to a message of at least one fragment.
    #[error("fragment count is zero")]
    ZeroFragmentCount,

    /// The fragment index does not fit the declared count.
    #[error("fragment index {index} out of range for count {count}")]
    FragmentIndexOutOfRange { index: u8, count: u8 },
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while turning one message into frames.
///
/// Fatal to that message only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The message needs more frames than the configured limit allows.
    #[error("message of {size} bytes needs {needed} fragments (max {max})")]
    TooManyFragments {
        size: usize,
        needed: usize,
        max: usize,
    },

    /// The block size leaves no room for payload after the header.
    #[error("block size {block_size} leaves no room after the {header}-byte header")]
    BlockTooSmall { block_size: usize, header: usize },

    /// Raw mode cannot fragment, and the packet exceeds one block.
    #[error("packet of {size} bytes exceeds the {max}-byte block")]
    TooLarge { size: usize, max: usize },
}

/// Errors raised during reassembly. The affected assembly is discarded; the
/// pipeline carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A frame disagrees with the assembly it belongs to.
    #[error(
        "frame {origin}/{sequence} declares {found_count} fragments ({found_version}), \
         assembly expects {expected_count} ({expected_version})"
    )]
    FragmentMismatch {
        origin: OriginId,
        sequence: u32,
        expected_count: u8,
        found_count: u8,
        expected_version: u8,
        found_version: u8,
    },

    /// The fragment index does not fit the declared count.
    #[error("frame {origin}/{sequence} has fragment {index} of {count}")]
    InvalidFragment {
        origin: OriginId,
        sequence: u32,
        index: u8,
        count: u8,
    },

    /// The frame declares more fragments than the receiver accepts.
    #[error("frame {origin}/{sequence} declares {count} fragments (max {max})")]
    TooManyFragments {
        origin: OriginId,
        sequence: u32,
        count: u8,
        max: usize,
    },

    /// The reassembled bytes do not parse as a packet of the declared version.
    #[error("malformed message {origin}/{sequence}: {source}")]
    Malformed {
        origin: OriginId,
        sequence: u32,
        #[source]
        source: WireError,
    },
}
