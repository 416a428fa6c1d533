//! MAVLink message model and wire codec for the sbdlink gateway.
//!
//! Only the small catalogue of messages that actually crosses an SBD link is
//! decoded into typed fields:
//! - Vehicle-bound commands (`SET_MODE`, `MISSION_SET_CURRENT`,
//!   `MISSION_ITEM_INT`, `COMMAND_LONG`, `COMMAND_INT`)
//! - Routine telemetry (`HIGH_LATENCY2`) and `HEARTBEAT`
//!
//! Anything else is carried as [`MessageBody::Raw`] so it can still be
//! forwarded to the GCS untouched.

pub mod adapter;
pub mod crc;
pub mod error;
pub mod message;
pub mod version;
pub mod wire;

pub use adapter::{convert, ProtocolVersionAdapter};
pub use error::{ConversionError, Result, WireError};
pub use message::{
    msg_id, CommandInt, CommandLong, Heartbeat, HighLatency2, MessageBody, MessageHeader,
    MissionItemInt, MissionSetCurrent, ProtocolMessage, SetMode,
};
pub use version::ProtocolVersion;
pub use wire::{decode_exact, decode_packet, encode, encoded_len, parse_datagram, ParsedDatagram};
