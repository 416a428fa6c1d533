use sbdlink_proto::ProtocolMessage;

use crate::config::{CommandAllowList, GENERIC_COMMAND_TYPES};
use crate::error::Filtered;

/// Decides which outbound messages may cross the channel.
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    allow: CommandAllowList,
}

impl CommandFilter {
    pub fn new(allow: CommandAllowList) -> Self {
        Self { allow }
    }

    pub fn allow_list(&self) -> &CommandAllowList {
        &self.allow
    }

    /// `Ok(())` if `msg` may be transmitted.
    pub fn check(&self, msg: &ProtocolMessage) -> Result<(), Filtered> {
        let msg_id = msg.msg_id();
        if !self.allow.permits_type(msg_id) {
            return Err(Filtered::UnsupportedType { msg_id });
        }

        if GENERIC_COMMAND_TYPES.contains(&msg_id) {
            // A catalogued command type always decodes its command field;
            // a Raw body with a command type id cannot be inspected.
            let Some(command) = msg.body.command_id() else {
                return Err(Filtered::UnsupportedType { msg_id });
            };
            if !self.allow.permits_command(command) {
                return Err(Filtered::DisallowedCommand { command });
            }
        }

        tracing::trace!(msg_id, name = msg.body.name(), "message permitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sbdlink_proto::{
        msg_id, CommandInt, CommandLong, Heartbeat, MessageBody, MessageHeader, MissionItemInt,
        ProtocolVersion, SetMode,
    };

    use super::*;

    fn msg(body: MessageBody) -> ProtocolMessage {
        ProtocolMessage::new(ProtocolVersion::V2, MessageHeader::default(), body)
    }

    fn command_long(command: u16) -> ProtocolMessage {
        msg(MessageBody::CommandLong(CommandLong {
            command,
            ..CommandLong::default()
        }))
    }

    #[test]
    fn allowed_types_pass() {
        let filter = CommandFilter::default();
        assert_eq!(filter.check(&msg(MessageBody::SetMode(SetMode::default()))), Ok(()));
        assert_eq!(
            filter.check(&msg(MessageBody::MissionItemInt(MissionItemInt::default()))),
            Ok(())
        );
        assert_eq!(filter.check(&command_long(400)), Ok(()));
    }

    #[test]
    fn unsupported_type_is_distinguished() {
        let filter = CommandFilter::default();
        assert_eq!(
            filter.check(&msg(MessageBody::Heartbeat(Heartbeat::default()))),
            Err(Filtered::UnsupportedType {
                msg_id: msg_id::HEARTBEAT
            })
        );
    }

    #[test]
    fn commands_outside_list_are_always_filtered() {
        let filter = CommandFilter::default();
        let allowed: Vec<u16> = filter.allow_list().commands().collect();
        for command in (0..=u16::MAX).step_by(7).filter(|c| !allowed.contains(c)) {
            assert_eq!(
                filter.check(&command_long(command)),
                Err(Filtered::DisallowedCommand { command })
            );
        }

        let reboot = msg(MessageBody::CommandInt(CommandInt {
            command: 246,
            ..CommandInt::default()
        }));
        assert_eq!(
            filter.check(&reboot),
            Err(Filtered::DisallowedCommand { command: 246 })
        );
    }

    #[test]
    fn command_type_must_itself_be_allowed() {
        let allow = CommandAllowList::new([msg_id::SET_MODE], [400]).unwrap();
        let filter = CommandFilter::new(allow);
        assert_eq!(
            filter.check(&command_long(400)),
            Err(Filtered::UnsupportedType {
                msg_id: msg_id::COMMAND_LONG
            })
        );
    }

    #[test]
    fn raw_command_body_is_refused() {
        let filter = CommandFilter::default();
        let raw = msg(MessageBody::Raw {
            msg_id: msg_id::COMMAND_LONG,
            payload: Default::default(),
            checksum: 0,
        });
        assert!(matches!(
            filter.check(&raw),
            Err(Filtered::UnsupportedType { .. })
        ));
    }
}
