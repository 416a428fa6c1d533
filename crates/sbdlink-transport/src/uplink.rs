use crate::block::Submission;
use crate::broker::BrokerUplink;
use crate::error::Result;
use crate::loopback::LoopbackUplink;
use crate::rock7::Rock7Uplink;

/// The active outbound channel.
#[derive(Debug, Clone)]
pub enum Uplink {
    Rock7(Rock7Uplink),
    Broker(BrokerUplink),
    Loopback(LoopbackUplink),
}

impl Uplink {
    pub fn name(&self) -> &'static str {
        match self {
            Uplink::Rock7(_) => "rock7",
            Uplink::Broker(_) => "broker",
            Uplink::Loopback(_) => "loopback",
        }
    }

    /// Submit one block for best-effort delivery.
    pub async fn submit(&self, block: &[u8]) -> Result<Submission> {
        match self {
            Uplink::Rock7(uplink) => uplink.submit(block).await,
            Uplink::Broker(uplink) => uplink.submit(block).await,
            Uplink::Loopback(uplink) => uplink.submit(block).await,
        }
    }
}

impl From<Rock7Uplink> for Uplink {
    fn from(uplink: Rock7Uplink) -> Self {
        Uplink::Rock7(uplink)
    }
}

impl From<BrokerUplink> for Uplink {
    fn from(uplink: BrokerUplink) -> Self {
        Uplink::Broker(uplink)
    }
}

impl From<LoopbackUplink> for Uplink {
    fn from(uplink: LoopbackUplink) -> Self {
        Uplink::Loopback(uplink)
    }
}
