//! Client for the pi coding agent's line-delimited RPC dialect.
//!
//! The agent is a subprocess that reads newline-delimited JSON commands on
//! stdin and writes newline-delimited JSON on stdout. Each outbound command
//! carries a freshly generated id; the agent answers either with a
//! `{"type":"response", ...}` value echoing that id, or with typed events
//! that describe the streaming progress of the current prompt.

mod client;
mod error;
mod types;

pub use client::{AgentChannels, AgentClient, AgentSpawnConfig, is_pi_available};
pub use error::{AgentError, Result};
pub use types::{
    AgentCommand, AgentEvent, AgentResponse, AgentUsage, AssistantEvent, ModelDescriptor,
    ToolCallSummary, ToolResultPayload,
};
