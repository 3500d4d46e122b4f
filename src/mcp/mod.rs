//! Tool provider protocol: line-delimited JSON over a subprocess's stdio.
//!
//! `initialize → list_tools → call_tool(name, args) → response`, with
//! responses multiplexed by request id and a best-effort `cancel` message
//! for aborting in-flight calls.

pub mod types;
pub mod transport;
pub mod client;

pub use client::ProviderClient;
pub use types::{ProviderResponse, ToolSpec};
