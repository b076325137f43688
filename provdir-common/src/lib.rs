//! # Provider Directory Common Library
//!
//! Shared code for the provider directory pipeline workspace:
//! - Error taxonomy (Error enum, Result alias)
//! - Configuration loading and validation (weights, thresholds, endpoints)
//! - Pipeline event types and EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
