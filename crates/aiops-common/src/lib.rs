//! Common types and utilities for the AIOps engine
//!
//! This crate provides the shared data model, error type and configuration
//! used across all components of the analysis pipeline.

pub mod config;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use types::*;
