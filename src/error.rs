use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lineage::MacroField;

/// The kinds of named artifact the pipeline tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dataset,
    Model,
    Evaluation,
    PrunedModel,
}

impl ArtifactKind {
    /// Prefix used when deriving fresh artifact names.
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Dataset => "dataset",
            ArtifactKind::Model => "model",
            ArtifactKind::Evaluation => "evaluation",
            ArtifactKind::PrunedModel => "pruned_model",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Dataset => write!(f, "Dataset"),
            ArtifactKind::Model => write!(f, "Model"),
            ArtifactKind::Evaluation => write!(f, "Evaluation"),
            ArtifactKind::PrunedModel => write!(f, "Pruned model"),
        }
    }
}

/// Errors raised by the lineage repository.
#[derive(Debug, Error)]
pub enum LineageError {
    #[error("{kind} '{name}' not found in lineage store")]
    NotFound { kind: ArtifactKind, name: String },

    #[error("{kind} '{name}' is already recorded")]
    DuplicateName { kind: ArtifactKind, name: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value in column '{column}': {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("macro field '{field}' must be finite, got {value}")]
    NonFiniteMacro { field: MacroField, value: f64 },
}

/// Failures reported by the opaque artifact operations (fit, score, prune, fetch).
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

/// Errors raised while running a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ArtifactKind, name: String },

    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("artifact storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("could not derive an unused {0} name")]
    NameSpaceExhausted(ArtifactKind),
}

impl WorkflowError {
    pub fn not_found(kind: ArtifactKind, name: impl Into<String>) -> Self {
        WorkflowError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Decide whether a retry can help, based on the error variant alone.
    pub fn classify(&self) -> Classification {
        match self {
            WorkflowError::NotFound { .. }
            | WorkflowError::MissingArgument(_)
            | WorkflowError::InvalidArgument(_) => Classification::Permanent(self.to_string()),
            WorkflowError::Operation(_)
            | WorkflowError::Storage(_)
            | WorkflowError::NameSpaceExhausted(_) => Classification::Transient(self.to_string()),
        }
    }
}

/// Classifies a task failure for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Retrying cannot help (bad input, missing referent).
    Permanent(String),
    /// Plausibly resolved by retrying (I/O hiccup, temporary unavailability).
    Transient(String),
}

impl Classification {
    pub fn reason(&self) -> &str {
        match self {
            Classification::Permanent(msg) | Classification::Transient(msg) => msg,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Classification::Permanent(_))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Permanent(msg) => write!(f, "Permanent failure: {msg}"),
            Classification::Transient(msg) => write!(f, "Transient failure: {msg}"),
        }
    }
}

/// Errors raised while bootstrapping a [`Pipeline`](crate::app::Pipeline).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Lineage error: {0}")]
    Lineage(#[from] LineageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
