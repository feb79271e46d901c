//! Core domain models for vedops
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, runs and their configuration.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use config::*;
pub use context::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
