//! Shared plumbing for the scriptorium crates.
//!
//! - [`config`]: on-disk configuration (JSON or TOML) with env overrides
//! - [`error`]: configuration and serialization errors
//! - [`perf`]: timing helpers for instrumentation
//! - `telemetry` (feature `telemetry`): tracing subscriber setup

pub mod config;
pub mod error;
pub mod perf;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use crate::config::{AutosaveSettings, Config};
pub use crate::error::{ConfigError, SerDeError};
