/// Why an outbound message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Filtered {
    /// The message type may not cross the channel.
    #[error("message type {msg_id} is not allowed toward the vehicle")]
    UnsupportedType { msg_id: u32 },

    /// A generic command message carries a command outside the allow-list.
    #[error("command {command} is not allowed toward the vehicle")]
    DisallowedCommand { command: u16 },
}

/// Errors building an allow-list from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllowListError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Nothing would ever be transmitted.
    #[error("allow-list permits no message types")]
    Empty,
}

pub type Result<T> = std::result::Result<T, AllowListError>;
