use crate::error::ConversionError;
use crate::message::{MessageBody, MissionItemInt, ProtocolMessage};
use crate::version::ProtocolVersion;

/// Re-target a message to another protocol version.
///
/// Fields the target version does not have are dropped. Fails only when the
/// target cannot carry the message at all.
pub fn convert(
    msg: ProtocolMessage,
    target: ProtocolVersion,
) -> Result<ProtocolMessage, ConversionError> {
    if msg.version == target {
        return Ok(msg);
    }

    let body = match msg.body {
        MessageBody::Raw { msg_id, .. } => {
            if target == ProtocolVersion::V1 && msg_id > u8::MAX as u32 {
                return Err(ConversionError::MessageIdOutOfRange { msg_id, target });
            }
            return Err(ConversionError::UnknownChecksumSeed { msg_id, target });
        }
        MessageBody::MissionItemInt(item) if target == ProtocolVersion::V1 => {
            if let Some(mission_type) = item.mission_type {
                tracing::debug!(mission_type, "dropping MISSION_ITEM_INT extension for v1");
            }
            MessageBody::MissionItemInt(MissionItemInt {
                mission_type: None,
                ..item
            })
        }
        other => other,
    };

    Ok(ProtocolMessage::new(target, msg.header, body))
}

/// Converts between the version spoken by the local GCS and the version used
/// on the satellite channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersionAdapter {
    local: ProtocolVersion,
    channel: ProtocolVersion,
}

impl ProtocolVersionAdapter {
    pub fn new(local: ProtocolVersion, channel: ProtocolVersion) -> Self {
        Self { local, channel }
    }

    pub fn local(&self) -> ProtocolVersion {
        self.local
    }

    pub fn channel(&self) -> ProtocolVersion {
        self.channel
    }

    /// True when both sides speak the same version and no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.local == self.channel
    }

    /// Outbound direction: GCS message → channel version.
    pub fn to_channel(&self, msg: ProtocolMessage) -> Result<ProtocolMessage, ConversionError> {
        convert(msg, self.channel)
    }

    /// Inbound direction: channel message → GCS version.
    pub fn to_local(&self, msg: ProtocolMessage) -> Result<ProtocolMessage, ConversionError> {
        convert(msg, self.local)
    }
}
