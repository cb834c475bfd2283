//! JSON-RPC app-server bridge in front of the pi coding agent.
//!
//! The bridge reads newline-delimited JSON-RPC from the client on stdin and
//! answers on stdout, while owning a pi agent subprocess that speaks its own
//! line-delimited command/event dialect. The translator reshapes the agent's
//! fine-grained event stream into the client's thread/turn/item lifecycle.

pub mod bridge;
pub mod credentials;
pub mod diff;
pub mod models;
pub mod protocol;
pub mod rate_limits;
pub mod translator;
pub mod wire_log;
