//! MAVLink-over-SBD gateway pipelines.
//!
//! ```text
//! GCS ─UDP─▶ filter ─▶ version adapter ─▶ frame encoder ─▶ queue ─▶ uplink ─▶ vehicle
//! GCS ◀─UDP─ version adapter ◀─ reassembler ◀─ tracker ◀─ ingress ◀─ sources ◀─ vehicle
//! ```
//!
//! [`Gateway`] owns the task wiring. The pipelines are usable on their own
//! for offline processing and tests.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod inbound;
pub mod outbound;
pub mod queue;
pub mod tracker;

pub use config::{GatewayConfig, QueueConfig, TrackerConfig};
pub use error::{Backpressure, GatewayError, Result};
pub use events::{EventBus, GatewayEvent, GatewayStats, StatsSnapshot};
pub use gateway::Gateway;
pub use inbound::{InboundMessage, InboundPipeline};
pub use outbound::OutboundPipeline;
pub use queue::{OutboundFrame, OutboundQueue, QueueDrain};
pub use tracker::{DeliveryRecord, DeliveryTracker, Verdict};
