use crate::version::ProtocolVersion;

/// Errors raised while parsing MAVLink bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The buffer ends before the packet does.
    #[error("truncated packet ({have} bytes, need {need})")]
    Truncated { have: usize, need: usize },

    /// The first byte is not a MAVLink start marker.
    #[error("invalid start marker 0x{0:02x}")]
    BadStartMarker(u8),

    /// The packet is framed for a different protocol version than declared.
    #[error("expected {expected} packet, found {found}")]
    VersionMismatch {
        expected: ProtocolVersion,
        found: ProtocolVersion,
    },

    /// The packet checksum does not match its contents.
    #[error("checksum mismatch for msg {msg_id} (got 0x{got:04x}, computed 0x{computed:04x})")]
    ChecksumMismatch { msg_id: u32, got: u16, computed: u16 },

    /// The declared payload length is not valid for the message.
    #[error("invalid payload length {len} for msg {msg_id} (max {max})")]
    PayloadLength { msg_id: u32, len: usize, max: usize },

    /// The packet sets incompatibility flags this codec does not understand.
    #[error("unsupported incompat flags 0x{0:02x}")]
    UnsupportedIncompatFlags(u8),

    /// Bytes remain after the packet.
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

/// Errors raised when a message cannot be represented in the target version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// MAVLink v1 only carries 8-bit message ids.
    #[error("msg {msg_id} cannot be carried by {target}")]
    MessageIdOutOfRange {
        msg_id: u32,
        target: ProtocolVersion,
    },

    /// Re-framing an uncatalogued message needs its CRC seed, which is unknown.
    #[error("no checksum seed known for msg {msg_id}; cannot re-frame as {target}")]
    UnknownChecksumSeed {
        msg_id: u32,
        target: ProtocolVersion,
    },
}

pub type Result<T> = std::result::Result<T, WireError>;
