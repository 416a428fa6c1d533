use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::version::ProtocolVersion;

/// Message ids of the decoded catalogue.
pub mod msg_id {
    pub const HEARTBEAT: u32 = 0;
    pub const SET_MODE: u32 = 11;
    pub const MISSION_SET_CURRENT: u32 = 41;
    pub const MISSION_ITEM_INT: u32 = 73;
    pub const COMMAND_INT: u32 = 75;
    pub const COMMAND_LONG: u32 = 76;
    pub const HIGH_LATENCY2: u32 = 235;
}

/// Static wire description of a catalogued message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MessageInfo {
    pub id: u32,
    pub name: &'static str,
    pub crc_extra: u8,
    /// Payload length of the base (v1) field set.
    pub base_len: usize,
    /// Extra bytes of v2 extension fields.
    pub ext_len: usize,
}

impl MessageInfo {
    pub(crate) fn max_len(&self, version: ProtocolVersion) -> usize {
        match version {
            ProtocolVersion::V1 => self.base_len,
            ProtocolVersion::V2 => self.base_len + self.ext_len,
        }
    }
}

const CATALOGUE: &[MessageInfo] = &[
    MessageInfo {
        id: msg_id::HEARTBEAT,
        name: "HEARTBEAT",
        crc_extra: 50,
        base_len: 9,
        ext_len: 0,
    },
    MessageInfo {
        id: msg_id::SET_MODE,
        name: "SET_MODE",
        crc_extra: 89,
        base_len: 6,
        ext_len: 0,
    },
    MessageInfo {
        id: msg_id::MISSION_SET_CURRENT,
        name: "MISSION_SET_CURRENT",
        crc_extra: 28,
        base_len: 4,
        ext_len: 0,
    },
    MessageInfo {
        id: msg_id::MISSION_ITEM_INT,
        name: "MISSION_ITEM_INT",
        crc_extra: 38,
        base_len: 37,
        ext_len: 1,
    },
    MessageInfo {
        id: msg_id::COMMAND_INT,
        name: "COMMAND_INT",
        crc_extra: 158,
        base_len: 35,
        ext_len: 0,
    },
    MessageInfo {
        id: msg_id::COMMAND_LONG,
        name: "COMMAND_LONG",
        crc_extra: 152,
        base_len: 33,
        ext_len: 0,
    },
    MessageInfo {
        id: msg_id::HIGH_LATENCY2,
        name: "HIGH_LATENCY2",
        crc_extra: 179,
        base_len: 42,
        ext_len: 0,
    },
];

pub(crate) fn info(id: u32) -> Option<&'static MessageInfo> {
    CATALOGUE.iter().find(|info| info.id == id)
}

/// Returns the catalogue name for a message id, if it is decoded by this crate.
pub fn message_name(id: u32) -> Option<&'static str> {
    info(id).map(|info| info.name)
}

/// Looks up a catalogued message id by its MAVLink name.
pub fn message_id_by_name(name: &str) -> Option<u32> {
    CATALOGUE
        .iter()
        .find(|info| info.name.eq_ignore_ascii_case(name))
        .map(|info| info.id)
}

/// Per-packet routing header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// MAVLink packet sequence (wraps at 255).
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
}

/// A decoded MAVLink message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub version: ProtocolVersion,
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl ProtocolMessage {
    pub fn new(version: ProtocolVersion, header: MessageHeader, body: MessageBody) -> Self {
        Self {
            version,
            header,
            body,
        }
    }

    pub fn msg_id(&self) -> u32 {
        self.body.msg_id()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetMode {
    pub custom_mode: u32,
    pub target_system: u8,
    pub base_mode: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissionSetCurrent {
    pub seq: u16,
    pub target_system: u8,
    pub target_component: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MissionItemInt {
    pub params: [f32; 4],
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub seq: u16,
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub frame: u8,
    pub current: u8,
    pub autocontinue: u8,
    /// v2 extension; always `None` for v1 messages. A v2 packet carries
    /// `None` as mission type 0, so 0 decodes back to `None`.
    pub mission_type: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommandLong {
    pub params: [f32; 7],
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub confirmation: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommandInt {
    pub params: [f32; 4],
    pub x: i32,
    pub y: i32,
    pub z: f32,
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub frame: u8,
    pub current: u8,
    pub autocontinue: u8,
}

/// Compact fixed-layout vehicle status sent over high-latency links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighLatency2 {
    pub timestamp: u32,
    /// Latitude, degE7.
    pub latitude: i32,
    /// Longitude, degE7.
    pub longitude: i32,
    pub custom_mode: u16,
    /// Altitude above MSL, m.
    pub altitude: i16,
    pub target_altitude: i16,
    /// Distance to target waypoint, dam.
    pub target_distance: u16,
    pub wp_num: u16,
    pub failure_flags: u16,
    pub vehicle_type: u8,
    pub autopilot: u8,
    /// Heading, deg/2.
    pub heading: u8,
    pub target_heading: u8,
    pub throttle: u8,
    pub airspeed: u8,
    pub airspeed_sp: u8,
    pub groundspeed: u8,
    pub windspeed: u8,
    pub wind_heading: u8,
    pub eph: u8,
    pub epv: u8,
    pub temperature_air: i8,
    pub climb_rate: i8,
    /// Remaining battery, percent (-1 unknown).
    pub battery: i8,
    pub custom0: i8,
    pub custom1: i8,
    pub custom2: i8,
}

/// Message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Heartbeat(Heartbeat),
    SetMode(SetMode),
    MissionSetCurrent(MissionSetCurrent),
    MissionItemInt(MissionItemInt),
    CommandLong(CommandLong),
    CommandInt(CommandInt),
    HighLatency2(HighLatency2),
    /// A message outside the catalogue, kept exactly as received.
    ///
    /// The checksum is stored because it cannot be recomputed without the
    /// message's CRC seed.
    Raw {
        msg_id: u32,
        payload: Bytes,
        checksum: u16,
    },
}

impl MessageBody {
    pub fn msg_id(&self) -> u32 {
        match self {
            MessageBody::Heartbeat(_) => msg_id::HEARTBEAT,
            MessageBody::SetMode(_) => msg_id::SET_MODE,
            MessageBody::MissionSetCurrent(_) => msg_id::MISSION_SET_CURRENT,
            MessageBody::MissionItemInt(_) => msg_id::MISSION_ITEM_INT,
            MessageBody::CommandLong(_) => msg_id::COMMAND_LONG,
            MessageBody::CommandInt(_) => msg_id::COMMAND_INT,
            MessageBody::HighLatency2(_) => msg_id::HIGH_LATENCY2,
            MessageBody::Raw { msg_id, .. } => *msg_id,
        }
    }

    pub fn name(&self) -> &'static str {
        message_name(self.msg_id()).unwrap_or("UNKNOWN")
    }

    /// The `MAV_CMD` carried by generic command-execution messages.
    pub fn command_id(&self) -> Option<u16> {
        match self {
            MessageBody::CommandLong(cmd) => Some(cmd.command),
            MessageBody::CommandInt(cmd) => Some(cmd.command),
            _ => None,
        }
    }

    /// Whether this is a generic command-execution message.
    pub fn is_command(&self) -> bool {
        self.command_id().is_some()
    }

    /// Writes the full, untruncated payload for `version`.
    pub(crate) fn write_payload(&self, version: ProtocolVersion, dst: &mut BytesMut) {
        match self {
            MessageBody::Heartbeat(m) => {
                dst.put_u32_le(m.custom_mode);
                dst.put_u8(m.vehicle_type);
                dst.put_u8(m.autopilot);
                dst.put_u8(m.base_mode);
                dst.put_u8(m.system_status);
                dst.put_u8(m.mavlink_version);
            }
            MessageBody::SetMode(m) => {
                dst.put_u32_le(m.custom_mode);
                dst.put_u8(m.target_system);
                dst.put_u8(m.base_mode);
            }
            MessageBody::MissionSetCurrent(m) => {
                dst.put_u16_le(m.seq);
                dst.put_u8(m.target_system);
                dst.put_u8(m.target_component);
            }
            MessageBody::MissionItemInt(m) => {
                for param in m.params {
                    dst.put_f32_le(param);
                }
                dst.put_i32_le(m.x);
                dst.put_i32_le(m.y);
                dst.put_f32_le(m.z);
                dst.put_u16_le(m.seq);
                dst.put_u16_le(m.command);
                dst.put_u8(m.target_system);
                dst.put_u8(m.target_component);
                dst.put_u8(m.frame);
                dst.put_u8(m.current);
                dst.put_u8(m.autocontinue);
                if version == ProtocolVersion::V2 {
                    dst.put_u8(m.mission_type.unwrap_or(0));
                }
            }
            MessageBody::CommandLong(m) => {
                for param in m.params {
                    dst.put_f32_le(param);
                }
                dst.put_u16_le(m.command);
                dst.put_u8(m.target_system);
                dst.put_u8(m.target_component);
                dst.put_u8(m.confirmation);
            }
            MessageBody::CommandInt(m) => {
                for param in m.params {
                    dst.put_f32_le(param);
                }
                dst.put_i32_le(m.x);
                dst.put_i32_le(m.y);
                dst.put_f32_le(m.z);
                dst.put_u16_le(m.command);
                dst.put_u8(m.target_system);
                dst.put_u8(m.target_component);
                dst.put_u8(m.frame);
                dst.put_u8(m.current);
                dst.put_u8(m.autocontinue);
            }
            MessageBody::HighLatency2(m) => {
                dst.put_u32_le(m.timestamp);
                dst.put_i32_le(m.latitude);
                dst.put_i32_le(m.longitude);
                dst.put_u16_le(m.custom_mode);
                dst.put_i16_le(m.altitude);
                dst.put_i16_le(m.target_altitude);
                dst.put_u16_le(m.target_distance);
                dst.put_u16_le(m.wp_num);
                dst.put_u16_le(m.failure_flags);
                dst.put_u8(m.vehicle_type);
                dst.put_u8(m.autopilot);
                dst.put_u8(m.heading);
                dst.put_u8(m.target_heading);
                dst.put_u8(m.throttle);
                dst.put_u8(m.airspeed);
                dst.put_u8(m.airspeed_sp);
                dst.put_u8(m.groundspeed);
                dst.put_u8(m.windspeed);
                dst.put_u8(m.wind_heading);
                dst.put_u8(m.eph);
                dst.put_u8(m.epv);
                dst.put_i8(m.temperature_air);
                dst.put_i8(m.climb_rate);
                dst.put_i8(m.battery);
                dst.put_i8(m.custom0);
                dst.put_i8(m.custom1);
                dst.put_i8(m.custom2);
            }
            MessageBody::Raw { payload, .. } => dst.put_slice(payload),
        }
    }

    /// Decodes a catalogued payload. `payload` may be truncated (v2); missing
    /// trailing bytes read as zero.
    pub(crate) fn read_payload(
        info: &MessageInfo,
        version: ProtocolVersion,
        payload: &[u8],
    ) -> Result<Self, WireError> {
        let max = info.max_len(version);
        if payload.len() > max || (version == ProtocolVersion::V1 && payload.len() != max) {
            return Err(WireError::PayloadLength {
                msg_id: info.id,
                len: payload.len(),
                max,
            });
        }

        let mut full = [0u8; 64];
        full[..payload.len()].copy_from_slice(payload);
        let mut buf = &full[..max];

        let body = match info.id {
            msg_id::HEARTBEAT => MessageBody::Heartbeat(Heartbeat {
                custom_mode: buf.get_u32_le(),
                vehicle_type: buf.get_u8(),
                autopilot: buf.get_u8(),
                base_mode: buf.get_u8(),
                system_status: buf.get_u8(),
                mavlink_version: buf.get_u8(),
            }),
            msg_id::SET_MODE => MessageBody::SetMode(SetMode {
                custom_mode: buf.get_u32_le(),
                target_system: buf.get_u8(),
                base_mode: buf.get_u8(),
            }),
            msg_id::MISSION_SET_CURRENT => MessageBody::MissionSetCurrent(MissionSetCurrent {
                seq: buf.get_u16_le(),
                target_system: buf.get_u8(),
                target_component: buf.get_u8(),
            }),
            msg_id::MISSION_ITEM_INT => MessageBody::MissionItemInt(MissionItemInt {
                params: read_params(&mut buf),
                x: buf.get_i32_le(),
                y: buf.get_i32_le(),
                z: buf.get_f32_le(),
                seq: buf.get_u16_le(),
                command: buf.get_u16_le(),
                target_system: buf.get_u8(),
                target_component: buf.get_u8(),
                frame: buf.get_u8(),
                current: buf.get_u8(),
                autocontinue: buf.get_u8(),
                mission_type: match version {
                    ProtocolVersion::V1 => None,
                    ProtocolVersion::V2 => Some(buf.get_u8()).filter(|&t| t != 0),
                },
            }),
            msg_id::COMMAND_LONG => MessageBody::CommandLong(CommandLong {
                params: read_params(&mut buf),
                command: buf.get_u16_le(),
                target_system: buf.get_u8(),
                target_component: buf.get_u8(),
                confirmation: buf.get_u8(),
            }),
            msg_id::COMMAND_INT => MessageBody::CommandInt(CommandInt {
                params: read_params(&mut buf),
                x: buf.get_i32_le(),
                y: buf.get_i32_le(),
                z: buf.get_f32_le(),
                command: buf.get_u16_le(),
                target_system: buf.get_u8(),
                target_component: buf.get_u8(),
                frame: buf.get_u8(),
                current: buf.get_u8(),
                autocontinue: buf.get_u8(),
            }),
            msg_id::HIGH_LATENCY2 => MessageBody::HighLatency2(HighLatency2 {
                timestamp: buf.get_u32_le(),
                latitude: buf.get_i32_le(),
                longitude: buf.get_i32_le(),
                custom_mode: buf.get_u16_le(),
                altitude: buf.get_i16_le(),
                target_altitude: buf.get_i16_le(),
                target_distance: buf.get_u16_le(),
                wp_num: buf.get_u16_le(),
                failure_flags: buf.get_u16_le(),
                vehicle_type: buf.get_u8(),
                autopilot: buf.get_u8(),
                heading: buf.get_u8(),
                target_heading: buf.get_u8(),
                throttle: buf.get_u8(),
                airspeed: buf.get_u8(),
                airspeed_sp: buf.get_u8(),
                groundspeed: buf.get_u8(),
                windspeed: buf.get_u8(),
                wind_heading: buf.get_u8(),
                eph: buf.get_u8(),
                epv: buf.get_u8(),
                temperature_air: buf.get_i8(),
                climb_rate: buf.get_i8(),
                battery: buf.get_i8(),
                custom0: buf.get_i8(),
                custom1: buf.get_i8(),
                custom2: buf.get_i8(),
            }),
            other => {
                return Err(WireError::PayloadLength {
                    msg_id: other,
                    len: payload.len(),
                    max: 0,
                })
            }
        };

        Ok(body)
    }
}

fn read_params<const N: usize>(buf: &mut &[u8]) -> [f32; N] {
    let mut params = [0f32; N];
    for param in params.iter_mut() {
        *param = buf.get_f32_le();
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lengths_match_written_payloads() {
        let bodies = [
            MessageBody::Heartbeat(Heartbeat::default()),
            MessageBody::SetMode(SetMode::default()),
            MessageBody::MissionSetCurrent(MissionSetCurrent::default()),
            MessageBody::MissionItemInt(MissionItemInt::default()),
            MessageBody::CommandLong(CommandLong::default()),
            MessageBody::CommandInt(CommandInt::default()),
            MessageBody::HighLatency2(HighLatency2::default()),
        ];

        for body in bodies {
            let info = info(body.msg_id()).expect("catalogued");
            for version in [ProtocolVersion::V1, ProtocolVersion::V2] {
                let mut buf = BytesMut::new();
                body.write_payload(version, &mut buf);
                assert_eq!(buf.len(), info.max_len(version), "{}", info.name);
            }
        }
    }

    #[test]
    fn names_resolve_both_ways() {
        assert_eq!(message_name(msg_id::COMMAND_LONG), Some("COMMAND_LONG"));
        assert_eq!(message_id_by_name("set_mode"), Some(msg_id::SET_MODE));
        assert_eq!(message_id_by_name("PARAM_SET"), None);
    }

    #[test]
    fn command_id_only_for_generic_commands() {
        let long = MessageBody::CommandLong(CommandLong {
            command: 400,
            ..CommandLong::default()
        });
        let mode = MessageBody::SetMode(SetMode::default());
        assert_eq!(long.command_id(), Some(400));
        assert!(long.is_command());
        assert_eq!(mode.command_id(), None);
    }

    #[test]
    fn v1_payload_must_be_exact_length() {
        let info = info(msg_id::SET_MODE).expect("catalogued");
        let err = MessageBody::read_payload(info, ProtocolVersion::V1, &[0u8; 5]).unwrap_err();
        assert!(matches!(err, WireError::PayloadLength { len: 5, max: 6, .. }));
    }

    #[test]
    fn v2_truncated_payload_reads_zero_tail() {
        let info = info(msg_id::SET_MODE).expect("catalogued");
        let body = MessageBody::read_payload(info, ProtocolVersion::V2, &[4, 0, 0, 0, 1]).unwrap();
        assert_eq!(
            body,
            MessageBody::SetMode(SetMode {
                custom_mode: 4,
                target_system: 1,
                base_mode: 0,
            })
        );
    }
}
