//! Goal-driven automation of a remote touchscreen device.
//!
//! Each step reads the device's accessibility tree over a polling command
//! channel, compresses it into numbered elements ([`tree`]), asks a language
//! model for one action ([`oracle`]), and carries that action out
//! ([`executor`]). [`automation`] ties the steps together and decides when to
//! stop.

pub mod action;
pub mod automation;
pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod logging;
pub mod oracle;
pub mod remote;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;

pub use automation::{Automation, AutomationEvent, RunReport, RunStatus, run_automation};
pub use channel::{CommandChannel, CommandResponse, CommandStatus, send_command};
pub use config::{LoopConfig, PollProfile, Settings};
