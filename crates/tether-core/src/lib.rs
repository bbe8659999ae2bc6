//! Core library for tether.
//!
//! Coordinates tool-use approvals between a chat transport and a
//! tool-capable agent engine: pending-approval correlation with timeouts,
//! per-conversation session state, invocation serialization, and the two
//! agent backends (streaming service and subprocess CLI) behind a single
//! event contract.

pub mod agent;
pub mod approval;
pub mod config;
pub mod exec;
pub mod session;
pub mod text;
pub mod turn;
