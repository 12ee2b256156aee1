//! End-to-end tests
//!
//! Messages published by the producer are played back through the in-memory
//! consumer group and dispatched to the built-in services. No broker or
//! registry process is needed; both sides share one in-memory registry.

mod pipeline;
