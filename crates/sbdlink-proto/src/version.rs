use std::fmt;

use serde::{Deserialize, Serialize};

/// MAVLink wire protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    /// Packet start marker.
    pub const fn stx(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 0xFE,
            ProtocolVersion::V2 => 0xFD,
        }
    }

    /// Header length including the start marker.
    pub const fn header_len(self) -> usize {
        match self {
            ProtocolVersion::V1 => 6,
            ProtocolVersion::V2 => 10,
        }
    }

    /// Tag carried in the SBD frame header.
    pub const fn tag(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ProtocolVersion::V1),
            2 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    pub fn from_stx(stx: u8) -> Option<Self> {
        match stx {
            0xFE => Some(ProtocolVersion::V1),
            0xFD => Some(ProtocolVersion::V2),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("MAVLink v1"),
            ProtocolVersion::V2 => f.write_str("MAVLink v2"),
        }
    }
}
