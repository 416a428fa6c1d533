//! SBD framing for MAVLink messages.
//!
//! An SBD block is tiny (270 bytes mobile-terminated on a 9603 modem) and is
//! delivered with no ordering guarantee. Every block carries a 7-byte header:
//! - A 4-byte little-endian message sequence shared by all fragments
//! - A 1-byte fragment index and a 1-byte fragment count
//! - A 1-byte protocol version tag for the reassembled packet
//!
//! Vehicles that send bare MAVLink packets are handled by
//! [`WireMode::Raw`]: no header, no fragmentation, one or more whole packets
//! per block.

pub mod codec;
pub mod encoder;
pub mod error;
pub mod origin;
pub mod reassembly;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, ModemPreset, WireMode, DEFAULT_MAX_FRAGMENTS,
    HEADER_SIZE, MAX_FRAGMENTS_CEILING,
};
pub use encoder::{EncodedMessage, FrameEncoder};
pub use error::{DecodeError, EncodeError, FrameError, Result};
pub use origin::OriginId;
pub use reassembly::{
    AssemblyKey, ExpiredAssembly, Reassembled, ReassemblyConfig, ReassemblyStats, Reassembler,
};
