//! MAVLink over Iridium short burst data.
//!
//! sbdlink carries commands from a ground control station to a vehicle, and
//! telemetry back, across a satellite channel that moves a few hundred bytes
//! at a time with no ordering or delivery guarantee.
//!
//! # Crate Structure
//!
//! - [`proto`]: MAVLink v1/v2 message model, wire codec and version adapter
//! - [`frame`]: SBD frame header, fragmentation and reassembly
//! - [`filter`]: outbound command allow-list
//! - [`transport`]: Rock7, broker and loopback uplinks, MO receivers, GCS endpoint
//! - [`gateway`]: delivery tracking, outbound queue and pipeline wiring

/// Re-export protocol types.
pub mod proto {
    pub use sbdlink_proto::*;
}

/// Re-export frame codec types.
pub mod frame {
    pub use sbdlink_frame::*;
}

/// Re-export command filter types.
pub mod filter {
    pub use sbdlink_filter::*;
}

/// Re-export channel adapter types.
pub mod transport {
    pub use sbdlink_transport::*;
}

/// Re-export gateway types.
pub mod gateway {
    pub use sbdlink_gateway::*;
}
