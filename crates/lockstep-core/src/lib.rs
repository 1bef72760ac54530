//! # lockstep-core
//!
//! Core types, configuration, and error handling for the Lockstep
//! audio/video synchronization engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackoffConfig, PipelineConfig};
pub use error::{Error, Result};
pub use types::*;
