//! Outbound safety boundary for the satellite channel.
//!
//! Only a narrow set of navigation, mode and arming messages may reach the
//! vehicle. Every rejection is reported as a [`Filtered`] value so callers
//! can log and count it.

pub mod config;
pub mod error;
pub mod filter;

pub use config::{command_id_by_name, command_name, CommandAllowList, GENERIC_COMMAND_TYPES};
pub use error::{AllowListError, Filtered, Result};
pub use filter::CommandFilter;
