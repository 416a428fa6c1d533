//! MAVLink v1/v2 packet encoding and decoding.
//!
//! ```text
//! v1: ┌─────┬─────┬─────┬───────┬────────┬───────────┬─────────┬──────────┐
//!     │ STX │ len │ seq │ sysid │ compid │ msgid(1B) │ payload │ crc(2B)  │
//!     │ FE  │     │     │       │        │           │         │ LE       │
//!     └─────┴─────┴─────┴───────┴────────┴───────────┴─────────┴──────────┘
//! v2: ┌─────┬─────┬──────────┬────────┬─────┬───────┬────────┬───────────┬─────────┬─────────┬───────────────┐
//!     │ STX │ len │ incompat │ compat │ seq │ sysid │ compid │ msgid(3B) │ payload │ crc(2B) │ signature(13) │
//!     │ FD  │     │          │        │     │       │        │ LE        │         │ LE      │ if signed     │
//!     └─────┴─────┴──────────┴────────┴─────┴───────┴────────┴───────────┴─────────┴─────────┴───────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::checksum;
use crate::error::{Result, WireError};
use crate::message::{info, MessageBody, MessageHeader, ProtocolMessage};
use crate::version::ProtocolVersion;

const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_SIGNED: u8 = 0x01;

/// Wire size of `msg` once encoded (including v2 zero truncation).
pub fn encoded_len(msg: &ProtocolMessage) -> usize {
    msg.version.header_len() + wire_payload(msg).len() + CHECKSUM_LEN
}

/// Encode a message into a single MAVLink packet.
pub fn encode(msg: &ProtocolMessage) -> Bytes {
    let mut dst = BytesMut::with_capacity(encoded_len(msg));
    encode_into(msg, &mut dst);
    dst.freeze()
}

/// Append an encoded MAVLink packet to `dst`.
pub fn encode_into(msg: &ProtocolMessage, dst: &mut BytesMut) {
    let payload = wire_payload(msg);
    let msg_id = msg.msg_id();

    dst.reserve(msg.version.header_len() + payload.len() + CHECKSUM_LEN);
    dst.put_u8(msg.version.stx());
    let crc_start = dst.len();
    dst.put_u8(payload.len() as u8);
    match msg.version {
        ProtocolVersion::V1 => {
            dst.put_u8(msg.header.sequence);
            dst.put_u8(msg.header.system_id);
            dst.put_u8(msg.header.component_id);
            dst.put_u8((msg_id & 0xFF) as u8);
        }
        ProtocolVersion::V2 => {
            dst.put_u8(0); // incompat flags
            dst.put_u8(0); // compat flags
            dst.put_u8(msg.header.sequence);
            dst.put_u8(msg.header.system_id);
            dst.put_u8(msg.header.component_id);
            dst.put_slice(&msg_id.to_le_bytes()[..3]);
        }
    }
    dst.put_slice(&payload);

    let crc = match (&msg.body, info(msg_id)) {
        (MessageBody::Raw { checksum, .. }, _) => *checksum,
        (_, Some(info)) => checksum(&dst[crc_start..], info.crc_extra),
        (_, None) => 0,
    };
    dst.put_u16_le(crc);
}

/// Payload bytes as they appear on the wire for the message's version.
fn wire_payload(msg: &ProtocolMessage) -> BytesMut {
    let mut payload = BytesMut::with_capacity(64);
    msg.body.write_payload(msg.version, &mut payload);
    if msg.version == ProtocolVersion::V2 && !matches!(msg.body, MessageBody::Raw { .. }) {
        // v2 drops trailing zero bytes, keeping at least one.
        let keep = payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(1, |last| last + 1);
        payload.truncate(keep);
    }
    payload
}

/// Decode one packet from the front of `buf`.
///
/// Returns the message and the number of bytes consumed. Packets of
/// catalogued messages are checksum-verified; other message ids are returned
/// as [`MessageBody::Raw`] without verification.
pub fn decode_packet(buf: &[u8]) -> Result<(ProtocolMessage, usize)> {
    let Some(&stx) = buf.first() else {
        return Err(WireError::Truncated { have: 0, need: 1 });
    };
    let version = ProtocolVersion::from_stx(stx).ok_or(WireError::BadStartMarker(stx))?;
    let header_len = version.header_len();
    if buf.len() < header_len {
        return Err(WireError::Truncated {
            have: buf.len(),
            need: header_len,
        });
    }

    let len = buf[1] as usize;
    let (incompat, header, msg_id) = match version {
        ProtocolVersion::V1 => (
            0u8,
            MessageHeader {
                sequence: buf[2],
                system_id: buf[3],
                component_id: buf[4],
            },
            buf[5] as u32,
        ),
        ProtocolVersion::V2 => (
            buf[2],
            MessageHeader {
                sequence: buf[4],
                system_id: buf[5],
                component_id: buf[6],
            },
            u32::from_le_bytes([buf[7], buf[8], buf[9], 0]),
        ),
    };

    if incompat & !INCOMPAT_SIGNED != 0 {
        return Err(WireError::UnsupportedIncompatFlags(incompat));
    }
    let signed = incompat & INCOMPAT_SIGNED != 0;
    let signature_len = if signed { SIGNATURE_LEN } else { 0 };

    let payload_end = header_len + len;
    let total = payload_end + CHECKSUM_LEN + signature_len;
    if buf.len() < total {
        return Err(WireError::Truncated {
            have: buf.len(),
            need: total,
        });
    }

    let payload = &buf[header_len..payload_end];
    let got = u16::from_le_bytes([buf[payload_end], buf[payload_end + 1]]);

    let body = match info(msg_id) {
        Some(info) => {
            let computed = checksum(&buf[1..payload_end], info.crc_extra);
            if computed != got {
                return Err(WireError::ChecksumMismatch {
                    msg_id,
                    got,
                    computed,
                });
            }
            MessageBody::read_payload(info, version, payload)?
        }
        // The stored checksum covers the incompat flags, so a signed packet
        // could not be re-emitted with a valid checksum once unsigned.
        None if signed => return Err(WireError::UnsupportedIncompatFlags(incompat)),
        None => MessageBody::Raw {
            msg_id,
            payload: Bytes::copy_from_slice(payload),
            checksum: got,
        },
    };

    Ok((ProtocolMessage::new(version, header, body), total))
}

/// Decode a buffer that must hold exactly one packet of `expected` version.
pub fn decode_exact(buf: &[u8], expected: ProtocolVersion) -> Result<ProtocolMessage> {
    if let Some(found) = buf.first().copied().and_then(ProtocolVersion::from_stx) {
        if found != expected {
            return Err(WireError::VersionMismatch { expected, found });
        }
    }
    let (msg, consumed) = decode_packet(buf)?;
    if consumed != buf.len() {
        return Err(WireError::TrailingBytes(buf.len() - consumed));
    }
    Ok(msg)
}

/// Result of splitting a datagram into packets.
#[derive(Debug, Default)]
pub struct ParsedDatagram {
    pub messages: Vec<ProtocolMessage>,
    pub errors: Vec<WireError>,
    /// Bytes skipped while searching for a start marker.
    pub skipped: usize,
}

/// Split a datagram that may carry several packets (and line noise).
///
/// Datagrams never span packets, so a truncated tail ends the scan.
pub fn parse_datagram(buf: &[u8]) -> ParsedDatagram {
    let mut parsed = ParsedDatagram::default();
    let mut rest = buf;

    while !rest.is_empty() {
        let Some(start) = rest
            .iter()
            .position(|b| ProtocolVersion::from_stx(*b).is_some())
        else {
            parsed.skipped += rest.len();
            break;
        };
        parsed.skipped += start;
        rest = &rest[start..];

        match decode_packet(rest) {
            Ok((msg, consumed)) => {
                parsed.messages.push(msg);
                rest = &rest[consumed..];
            }
            Err(err @ WireError::Truncated { .. }) => {
                parsed.errors.push(err);
                break;
            }
            Err(err) => {
                tracing::debug!(error = %err, "skipping unparseable packet");
                parsed.errors.push(err);
                parsed.skipped += 1;
                rest = &rest[1..];
            }
        }
    }

    parsed
}
