//! A reactive concurrency runtime: type-indexed pub/sub, a DSL for fusing
//! subscription/filter/scheduling words into reactions, priority- and
//! group-aware thread-pool scheduling, a simulated-clock chrono service, and
//! a [`PowerPlant`] that owns the whole lifecycle.
//!
//! A flat `pub mod` list at the root, an `error.rs` aggregate error type,
//! and a `log.rs`-style `log::init` entry point.

#[macro_use]
extern crate tracing;

pub mod chrono;
pub mod clock;
pub mod config;
pub mod dsl;
pub mod emit;
pub mod error;
pub mod ids;
pub mod log;
pub mod powerplant;
pub mod reaction;
pub mod reactor;
pub mod scheduler;
pub mod stats;
pub mod stores;

pub use config::{CliArgs, NetworkConfig, PoolConfig, PowerPlantConfig};
pub use error::{Error, Result};
pub use powerplant::{CommandLineArguments, LogLevel, PowerPlant};
pub use reaction::ReactionHandle;
pub use reactor::{Reactor, ReactorContext};
