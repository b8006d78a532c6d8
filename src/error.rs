//! Error taxonomy for the post-processing pipeline.

use crate::data_io::DataAccessError;
use thiserror::Error;

/// Errors raised by the normalization, aggregation and reduction stages.
///
/// None of these are retried. A failure aborts the current stage; whatever
/// was persisted before it (monthly files, stage markers) stays valid.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A field required by a rename or a derived quantity is absent.
    #[error("Missing field '{field}' ({context})")]
    MissingField { field: String, context: String },

    /// Expected file missing, unreadable or malformed.
    #[error("Data access error: {0}")]
    DataAccess(#[from] DataAccessError),

    /// Missing environment or invalid path/option setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Units mismatch for '{field}': expected one of [{expected}], found '{found}'")]
    UnitsMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Rename collision: '{source_name}' -> '{target}' ({reason})")]
    RenameCollision {
        source_name: String,
        target: String,
        reason: String,
    },

    /// Axis or array shape disagreement between fields.
    #[error("Shape error: {0}")]
    Shape(String),

    /// Stage ordering violation or unusable stage marker.
    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Stage marker serialization error: {0}")]
    Marker(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Append `context` (a month, a run tag) to errors that carry a message.
    pub fn in_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::MissingField { field, context: c } => Self::MissingField {
                field,
                context: format!("{c}, {context}"),
            },
            Self::UnitsMismatch {
                field,
                expected,
                found,
            } => Self::UnitsMismatch {
                field: format!("{field} ({context})"),
                expected,
                found,
            },
            Self::Shape(msg) => Self::Shape(format!("{msg} ({context})")),
            Self::Stage(msg) => Self::Stage(format!("{msg} ({context})")),
            other => other,
        }
    }

    /// True for the errors that mean "the input run is incomplete".
    pub fn is_missing_input(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::DataAccess(DataAccessError::FileNotFound(_))
        )
    }
}

impl From<ndarray::ShapeError> for PipelineError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e.to_string())
    }
}
