use std::time::SystemTime;

use bytes::Bytes;
use sbdlink_frame::OriginId;
use tokio::sync::mpsc;

/// One block received from the satellite channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundBlock {
    /// Device that sent the block (modem IMEI).
    pub origin: OriginId,
    /// Channel-assigned sequence (Rock7 MOMSN), when the source reports one.
    pub sequence_hint: Option<u32>,
    pub payload: Bytes,
    /// Transmit time reported by the channel, or local arrival time.
    pub received_at: SystemTime,
}

/// Sending half of the shared ingress queue.
pub type IngressSender = mpsc::Sender<InboundBlock>;

/// Outcome of handing one block to the channel provider.
///
/// Acceptance means the provider queued the block, not that the vehicle
/// received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted {
        /// Provider-side message reference, if any.
        reference: Option<String>,
    },
    Rejected {
        reason: String,
        /// Whether submitting the same block again may succeed.
        retryable: bool,
    },
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted { .. })
    }
}
