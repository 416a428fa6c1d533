use std::time::Duration;

use sbdlink_filter::CommandAllowList;
use sbdlink_frame::{FrameConfig, ReassemblyConfig};
use sbdlink_proto::ProtocolVersion;

/// Inbound duplicate and staleness suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delivered `(origin, sequence)` pairs remembered. Default: 256.
    pub window: usize,
    /// How far behind an origin's high-water mark a sequence may fall before
    /// it is dropped as stale. Default: 32.
    pub staleness_margin: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: 256,
            staleness_margin: 32,
        }
    }
}

/// Outbound queue and submission pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Frames held before new messages are refused. Default: 32.
    pub capacity: usize,
    /// Minimum spacing between channel submissions. Default: 20 s.
    pub min_submit_interval: Duration,
    /// Bound on one submission attempt. Default: 30 s.
    pub submit_timeout: Duration,
    /// Extra attempts after the first failure. Default: 3.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt. Default: 5 s.
    pub retry_backoff: Duration,
    /// Bytes per SBD billing credit. Default: 50.
    pub credit_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            min_submit_interval: Duration::from_secs(20),
            submit_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(5),
            credit_bytes: 50,
        }
    }
}

impl QueueConfig {
    /// Credits charged for a block of `len` bytes.
    pub fn credits_for(&self, len: usize) -> u64 {
        len.div_ceil(self.credit_bytes.max(1)).max(1) as u64
    }
}

/// Everything a [`Gateway`](crate::Gateway) needs at construction.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub frame: FrameConfig,
    pub reassembly: ReassemblyConfig,
    pub tracker: TrackerConfig,
    pub queue: QueueConfig,
    pub allow_list: CommandAllowList,
    /// Version spoken with the GCS.
    pub local_version: ProtocolVersion,
    /// Version carried over the satellite channel.
    pub channel_version: ProtocolVersion,
    /// Inbound blocks buffered between sources and the pipeline. Default: 64.
    pub ingress_capacity: usize,
    /// How often stale assemblies are purged. Default: 10 s.
    pub sweep_interval: Duration,
    /// Events buffered per subscriber. Default: 256.
    pub event_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            reassembly: ReassemblyConfig::default(),
            tracker: TrackerConfig::default(),
            queue: QueueConfig::default(),
            allow_list: CommandAllowList::default(),
            local_version: ProtocolVersion::V2,
            channel_version: ProtocolVersion::V2,
            ingress_capacity: 64,
            sweep_interval: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_round_up_per_started_unit() {
        let config = QueueConfig::default();
        assert_eq!(config.credits_for(0), 1);
        assert_eq!(config.credits_for(50), 1);
        assert_eq!(config.credits_for(51), 2);
        assert_eq!(config.credits_for(270), 6);
    }
}
