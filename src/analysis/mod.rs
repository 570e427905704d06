//! Read-only queries over a loaded record store
//!
//! Nothing here mutates the store; sessions are derived on every call.

pub mod sessions;
pub mod transitions;
pub mod usage;

pub use sessions::{client_sessions, reconstruct, Session, SessionStep};
pub use transitions::{
    transfer_graph, GraphOptions, TransitionGraph, TransitionGraphLayer, TransitionGraphNode,
};
pub use usage::{usage_stats, UsageCategory, UsageOptions, UsageStatRow, UsageStats};
