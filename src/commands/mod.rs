//! Subcommand handlers.
//!
//! - `serve`: run the consumer and dispatch jobs until a shutdown signal
//! - `produce`: publish a single message
//! - `services`: inspect the registered services

pub mod produce;
pub mod serve;
pub mod services;
