//! Process-wide observability: tracing initialization and the global metrics
//! registry with its HTTP endpoint. Every service binary calls
//! [`tracing::initialize`] exactly once before doing anything interesting and
//! spawns [`metrics::serve`] next to its real work.

pub mod metrics;
pub mod tracing;
