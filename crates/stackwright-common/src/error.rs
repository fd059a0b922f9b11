//! Error types for Stackwright
//!
//! Errors are structured with fields to aid debugging in production.
//! Each error variant includes contextual information like the machine label,
//! provider name, or engine operation that failed.
//!
//! Phases that keep going after individual failures (reconciliation, waiting
//! for agents) collect their causes into a [`MultiError`], which the caller can
//! tell apart from a single-cause failure through [`Error::Multiple`].

use std::fmt;

use thiserror::Error;

use crate::template::TemplateError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Stackwright operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or missing required field
    #[error("validation error for {context}: {}{message}", field_prefix(field))]
    Validation {
        /// What was being validated (e.g., "authenticate request")
        context: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "groupName")
        field: Option<String>,
    },

    /// No usable credential for a provider
    #[error("credential error [{provider}]: {message}")]
    MissingCredential {
        /// Provider the credential was looked up for
        provider: String,
        /// Description of what's missing or invalid
        message: String,
    },

    /// Execution engine plan/apply failure
    #[error("engine error [{operation}]: {message}")]
    Engine {
        /// Engine operation that failed (connect, plan, apply)
        operation: String,
        /// Message reported by the engine
        message: String,
    },

    /// Realized state does not match the machines the host expects
    #[error("reconciliation error for {machine}: {message}")]
    Reconciliation {
        /// Label of the machine that could not be reconciled
        machine: String,
        /// Description of the mismatch
        message: String,
    },

    /// Credential store or database failure
    #[error("persistence error [{context}]: {message}")]
    Persistence {
        /// Store or record being written/read
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Instance never became reachable
    #[error("dial error for {machine}: {message}")]
    Dial {
        /// Label of the unreachable machine
        machine: String,
        /// Last failure reason
        message: String,
    },

    /// Template rendering or interpolation failure
    #[error("template error: {source}")]
    Template {
        /// The underlying template error
        #[from]
        source: TemplateError,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The record kind being serialized (if known)
        kind: Option<String>,
    },

    /// Several independent failures
    #[error("{0}")]
    Multiple(#[from] MultiError),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            context: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with context
    pub fn validation_for(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with context and field name
    pub fn validation_for_field(
        context: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            context: context.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing-credential error for a provider
    pub fn missing_credential(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MissingCredential {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create an engine error for an operation
    pub fn engine(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a reconciliation error for a machine
    pub fn reconciliation(machine: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Reconciliation {
            machine: machine.into(),
            message: msg.into(),
        }
    }

    /// Create a persistence error with context
    pub fn persistence(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Persistence {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a dial error for a machine
    pub fn dial(machine: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Dial {
            machine: machine.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with record kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, credential, template and serialization errors need a
    /// configuration fix. Engine errors are retried by the engine client, never
    /// locally, so they are reported as not retryable here.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::MissingCredential { .. } => false,
            Error::Engine { .. } => false,
            Error::Reconciliation { .. } => false,
            Error::Persistence { .. } => true,
            Error::Dial { .. } => true,
            Error::Template { .. } => false,
            Error::Serialization { .. } => false,
            Error::Multiple(multi) => multi.iter().all(Error::is_retryable),
            Error::Internal { .. } => true,
        }
    }

    /// Get the machine label if this error is about a specific machine
    pub fn machine(&self) -> Option<&str> {
        match self {
            Error::Reconciliation { machine, .. } => Some(machine),
            Error::Dial { machine, .. } => Some(machine),
            _ => None,
        }
    }

    /// Whether this error aggregates several causes
    pub fn is_multiple(&self) -> bool {
        matches!(self, Error::Multiple(_))
    }
}

fn field_prefix(field: &Option<String>) -> String {
    field
        .as_deref()
        .map(|f| format!("{}: ", f))
        .unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// An ordered collection of independent failures
///
/// Every cause is kept; appending never drops earlier errors.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cause, flattening nested aggregates
    pub fn push(&mut self, err: Error) {
        match err {
            Error::Multiple(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Number of causes
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no cause has been recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the causes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// Consume the aggregate, returning the causes
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// `Ok(())` when empty, otherwise the aggregate as an [`Error::Multiple`]
    pub fn into_result(self) -> Result<(), Error> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Multiple(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "1 error occurred:\n\t* {}", self.errors[0]);
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<Error> for MultiError {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        let mut multi = MultiError::new();
        for err in iter {
            multi.push(err);
        }
        multi
    }
}
