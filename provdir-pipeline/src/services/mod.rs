//! Pipeline services

pub mod notifier;
pub mod scorer;

pub use notifier::{DirectoryNotifier, Notification};
pub use scorer::{ConfidenceScorer, ScoreBreakdown};
