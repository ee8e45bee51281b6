//! Error taxonomy for the subject runtime.
//!
//! Configuration problems are fatal and surface at context build time;
//! everything else propagates to the caller of the property accessor that
//! triggered it. The backing field is only touched by the terminal pipeline
//! step, so a failed write never leaves partial state behind.

use std::fmt;

/// Errors raised while assembling a context or resolving its services.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    /// No service of the requested kind is registered on the context or any
    /// of its fallbacks.
    MissingService { kind: &'static str },
    /// More than one service matched where exactly one was required.
    AmbiguousService { kind: &'static str, count: usize },
    /// The placement constraints of the registered services form a cycle.
    OrderingCycle { members: Vec<&'static str> },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingService { kind } => {
                write!(
                    f,
                    "no service of kind '{kind}' is registered. \
                     Use context.with_service(..) or add a fallback context that provides it"
                )
            }
            ConfigurationError::AmbiguousService { kind, count } => {
                write!(
                    f,
                    "expected exactly one service of kind '{kind}', found {count}"
                )
            }
            ConfigurationError::OrderingCycle { members } => {
                write!(
                    f,
                    "service placement constraints form a cycle: {}",
                    members.join(" -> ")
                )
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A single validator finding for a rejected write.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationFailure {
    pub property: String,
    pub message: String,
    pub code: String,
}

impl ValidationFailure {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
            code: "validation".to_string(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

/// Errors surfaced by property reads, writes, and method invocations.
pub enum SubjectError {
    /// One or more validators rejected the new value; the write did not happen.
    Validation(Vec<ValidationFailure>),
    /// Write attempted on a derived or getter-only property.
    ReadOnly(String),
    /// Read attempted on a setter-only property.
    WriteOnly(String),
    /// The subject has no property with this name, or a path segment did not
    /// resolve.
    PropertyNotFound(String),
    /// A subject identifier or path did not resolve to a live subject.
    SubjectNotFound(String),
    /// Context service resolution failed mid-operation.
    Configuration(ConfigurationError),
    /// A transaction commit observed a concurrent modification.
    Conflict(String),
    /// The operation was cancelled cooperatively.
    Cancelled,
    Internal(String),
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectError::Validation(failures) => {
                write!(f, "validation failed: ")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", failure.property, failure.message)?;
                }
                Ok(())
            }
            SubjectError::ReadOnly(name) => write!(f, "property '{name}' is read-only"),
            SubjectError::WriteOnly(name) => write!(f, "property '{name}' is write-only"),
            SubjectError::PropertyNotFound(name) => write!(f, "property '{name}' not found"),
            SubjectError::SubjectNotFound(id) => write!(f, "subject '{id}' not found"),
            SubjectError::Configuration(err) => write!(f, "{err}"),
            SubjectError::Conflict(msg) => write!(f, "transaction conflict: {msg}"),
            SubjectError::Cancelled => write!(f, "cancelled"),
            SubjectError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl fmt::Debug for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for SubjectError {}

impl From<ConfigurationError> for SubjectError {
    fn from(err: ConfigurationError) -> Self {
        SubjectError::Configuration(err)
    }
}

/// Errors from the connector I/O layer.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// The far side is unreachable or misbehaved; triggers reconnect backoff.
    Transport(String),
    Cancelled,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "transport error: {msg}"),
            SourceError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for SourceError {}
