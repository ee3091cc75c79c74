//! Consumer-side state for gateway events: the optimistic chat feed and
//! typing-indicator aggregation. Pure state machines — callers own the
//! socket and the clock, which keeps every transition testable without a
//! runtime or timers.

pub mod feed;
pub mod typing;
