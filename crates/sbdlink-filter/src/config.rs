use std::collections::BTreeSet;

use sbdlink_proto::message::{message_id_by_name, message_name};
use sbdlink_proto::msg_id;

use crate::error::{AllowListError, Result};

/// Message types that execute an embedded `MAV_CMD`; these are additionally
/// checked against the command set.
pub const GENERIC_COMMAND_TYPES: [u32; 2] = [msg_id::COMMAND_LONG, msg_id::COMMAND_INT];

/// `MAV_CMD` names known to the allow-list parser.
const COMMAND_NAMES: &[(u16, &str)] = &[
    (16, "NAV_WAYPOINT"),
    (20, "NAV_RETURN_TO_LAUNCH"),
    (21, "NAV_LAND"),
    (22, "NAV_TAKEOFF"),
    (84, "NAV_VTOL_TAKEOFF"),
    (85, "NAV_VTOL_LAND"),
    (176, "DO_SET_MODE"),
    (177, "DO_JUMP"),
    (178, "DO_CHANGE_SPEED"),
    (183, "DO_SET_SERVO"),
    (185, "DO_FLIGHTTERMINATION"),
    (192, "DO_REPOSITION"),
    (208, "DO_PARACHUTE"),
    (246, "PREFLIGHT_REBOOT_SHUTDOWN"),
    (300, "MISSION_START"),
    (400, "COMPONENT_ARM_DISARM"),
    (2600, "CONTROL_HIGH_LATENCY"),
];

const DEFAULT_MESSAGE_TYPES: [u32; 5] = [
    msg_id::SET_MODE,
    msg_id::MISSION_SET_CURRENT,
    msg_id::MISSION_ITEM_INT,
    msg_id::COMMAND_LONG,
    msg_id::COMMAND_INT,
];

const DEFAULT_COMMANDS: [u16; 13] = [20, 21, 22, 84, 85, 176, 178, 183, 192, 208, 300, 400, 2600];

/// Looks up a command id by name, with or without the `MAV_CMD_` prefix.
pub fn command_id_by_name(name: &str) -> Option<u16> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("MAV_CMD_").unwrap_or(&upper);
    COMMAND_NAMES
        .iter()
        .find(|(_, known)| *known == bare)
        .map(|(id, _)| *id)
}

pub fn command_name(id: u16) -> Option<&'static str> {
    COMMAND_NAMES
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}

/// Immutable sets of message types and command ids permitted toward the
/// vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAllowList {
    message_types: BTreeSet<u32>,
    commands: BTreeSet<u16>,
}

impl CommandAllowList {
    pub fn new(
        message_types: impl IntoIterator<Item = u32>,
        commands: impl IntoIterator<Item = u16>,
    ) -> Result<Self> {
        let message_types: BTreeSet<u32> = message_types.into_iter().collect();
        if message_types.is_empty() {
            return Err(AllowListError::Empty);
        }
        Ok(Self {
            message_types,
            commands: commands.into_iter().collect(),
        })
    }

    /// Build from configuration entries. Each entry is a numeric id or a name
    /// (`"SET_MODE"`, `"MAV_CMD_NAV_LAND"`, `"NAV_LAND"`).
    pub fn from_entries<S: AsRef<str>>(message_types: &[S], commands: &[S]) -> Result<Self> {
        let types = message_types
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<u32>()
                    .ok()
                    .or_else(|| message_id_by_name(entry))
                    .ok_or_else(|| AllowListError::UnknownMessageType(entry.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let commands = commands
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<u16>()
                    .ok()
                    .or_else(|| command_id_by_name(entry))
                    .ok_or_else(|| AllowListError::UnknownCommand(entry.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(types, commands)
    }

    pub fn permits_type(&self, msg_id: u32) -> bool {
        self.message_types.contains(&msg_id)
    }

    pub fn permits_command(&self, command: u16) -> bool {
        self.commands.contains(&command)
    }

    pub fn message_types(&self) -> impl Iterator<Item = u32> + '_ {
        self.message_types.iter().copied()
    }

    pub fn commands(&self) -> impl Iterator<Item = u16> + '_ {
        self.commands.iter().copied()
    }

    /// Human-readable entries, for `check` output.
    pub fn describe_types(&self) -> Vec<String> {
        self.message_types
            .iter()
            .map(|id| match message_name(*id) {
                Some(name) => format!("{name} ({id})"),
                None => id.to_string(),
            })
            .collect()
    }

    pub fn describe_commands(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|id| match command_name(*id) {
                Some(name) => format!("MAV_CMD_{name} ({id})"),
                None => id.to_string(),
            })
            .collect()
    }
}

impl Default for CommandAllowList {
    /// The field gateway's list: mission upload, mode changes and a handful of
    /// navigation, arming and recovery commands.
    fn default() -> Self {
        Self {
            message_types: DEFAULT_MESSAGE_TYPES.into_iter().collect(),
            commands: DEFAULT_COMMANDS.into_iter().collect(),
        }
    }
}
