//! Error types for the selection engine

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TopicId;

/// Shortfall of eligible items for one topic during form assembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDeficit {
    pub topic: TopicId,
    pub required: usize,
    pub available: usize,
}

/// Every topic a blueprint could not be filled for.
///
/// Carries the full list rather than the first failure so the caller can decide
/// between shortening the form, relaxing filters or reporting upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeficitReport {
    pub blueprint_id: String,
    pub length: usize,
    pub deficits: Vec<TopicDeficit>,
}

impl fmt::Display for DeficitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blueprint {} cannot fill a form of length {}:",
            self.blueprint_id, self.length
        )?;
        for d in &self.deficits {
            write!(
                f,
                " [{} required {} available {}]",
                d.topic, d.required, d.available
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for DeficitReport {}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Blueprint failed validation
    #[error("Invalid blueprint: {0}")]
    InvalidBlueprint(String),

    /// Configuration failed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Learner extension entry rejected
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Not enough eligible items to satisfy the blueprint
    #[error(transparent)]
    BlueprintDeficit(#[from] DeficitReport),

    /// JSON error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
