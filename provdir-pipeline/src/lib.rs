//! provdir-pipeline library interface
//!
//! Exposes the pipeline building blocks for integration testing: models,
//! store, stages, collaborator traits, orchestration, input, and export.

pub mod collaborators;
pub mod db;
pub mod export;
pub mod input;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod stages;

pub use pipeline::PipelineOrchestrator;
