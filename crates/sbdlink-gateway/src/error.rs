use sbdlink_filter::Filtered;

/// The outbound queue cannot take every frame of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("outbound queue full: {needed} frames needed, {available} free")]
pub struct Backpressure {
    pub needed: usize,
    pub available: usize,
}

/// Errors that can occur in gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Channel or local endpoint failure.
    #[error("transport error: {0}")]
    Transport(#[from] sbdlink_transport::TransportError),

    /// Outbound message could not be framed.
    #[error("encode error: {0}")]
    Encode(#[from] sbdlink_frame::EncodeError),

    /// Outbound message refused by the command filter.
    #[error("filtered: {0}")]
    Filtered(#[from] Filtered),

    /// Message cannot be expressed in the target protocol version.
    #[error("conversion error: {0}")]
    Conversion(#[from] sbdlink_proto::ConversionError),

    #[error(transparent)]
    Backpressure(#[from] Backpressure),

    /// A pipeline task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
