//! Custom error types for the preprocessing engine.
//!
//! This module provides the error hierarchy using `thiserror` for every
//! layer of the engine: domain derivation, table conversion, step building
//! and pipeline runs.
//!
//! Errors are serializable so a host application can forward them to a
//! frontend for display.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the preprocessing engine.
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// Run was cancelled by the caller.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// A step's parameters are missing or malformed beyond documented defaults.
    #[error("Invalid configuration for step '{step}': {reason}")]
    InvalidStepConfig { step: String, reason: String },

    /// No step factory is registered under the given qualified name.
    #[error("Unknown preprocessing step '{0}'")]
    UnknownStep(String),

    /// A shared computation was invoked against a table it cannot read.
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),

    /// A domain could not be constructed (e.g. duplicate variable names).
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    /// Column data does not agree with the domain it is paired with.
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    /// Column was not found in the table.
    #[error("Column '{0}' not found in table")]
    ColumnNotFound(String),

    /// A run thread could not be started or panicked.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PreprocessError>,
    },
}

impl PreprocessError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PreprocessError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for [`PreprocessError::InvalidStepConfig`].
    pub fn invalid_step(step: impl Into<String>, reason: impl Into<String>) -> Self {
        PreprocessError::InvalidStepConfig {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for frontend handling.
    ///
    /// These codes let a host tell a cancellation apart from a failure and
    /// show the right message (or none) to the user.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::InvalidStepConfig { .. } => "INVALID_STEP_CONFIG",
            Self::UnknownStep(_) => "UNKNOWN_STEP",
            Self::DomainMismatch(_) => "DOMAIN_MISMATCH",
            Self::InvalidDomain(_) => "INVALID_DOMAIN",
            Self::InvalidTable(_) => "INVALID_TABLE",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if this error is recoverable by editing the step list and
    /// starting a fresh run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::InvalidStepConfig { .. } | Self::UnknownStep(_)
        )
    }
}

/// Errors are serialized as a struct with `code` and `message` fields,
/// making them easy to handle in a frontend.
impl Serialize for PreprocessError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PreprocessError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for preprocessing operations.
pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PreprocessError::Polars(e).with_context(context))
    }
}
