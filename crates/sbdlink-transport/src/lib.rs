//! Channel adapters for the Iridium SBD link.
//!
//! Every inbound source (webhook, polled feed, broker bridge) pushes
//! [`InboundBlock`]s into one bounded ingress channel. Outbound blocks go
//! through a single [`Uplink`]:
//! - Rock7 HTTP "MT" submission
//! - A broker bridge publishing Cloudloop envelopes
//! - An in-memory loopback for dry runs and tests
//!
//! The GCS side is a [`LocalEndpoint`] over UDP.

pub mod block;
pub mod bridge;
pub mod broker;
pub mod delivery;
pub mod error;
pub mod feed;
pub mod loopback;
pub mod rock7;
pub mod udp;
pub mod uplink;
pub mod webhook;

pub use block::{InboundBlock, IngressSender, Submission};
pub use bridge::{BridgeConfig, BrokerBridge};
pub use broker::{BrokerMessage, BrokerPublication, BrokerTopics, BrokerUplink, ImtLocation};
pub use error::{Result, TransportError};
pub use feed::{FeedConfig, FeedPoller, FeedRecord};
pub use loopback::{LoopbackOutcome, LoopbackUplink};
pub use rock7::{Rock7Config, Rock7Uplink, ROCK7_MT_URL};
pub use udp::{EndpointMode, EndpointSpec, LocalEndpoint};
pub use uplink::Uplink;
pub use webhook::{MoDelivery, Refusal, WebhookConfig, WebhookServer};
