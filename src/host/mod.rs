//! Host shell integration: versioned NDJSON contract, command router and
//! the stdio transport used by the `huddle-host` binary.

pub mod bridge;
pub mod contract;
pub mod stdio;

pub use bridge::{BridgeSink, BridgeTextChannel, HostBridge, HostEvents};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use stdio::{run_bridge_io, run_stdio_bridge};
