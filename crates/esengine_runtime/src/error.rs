//! Error types for esengine_runtime

use std::fmt;
use thiserror::Error;

use crate::ecs::Entity;

/// A single rejected field of a component insert
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldIssue {
    /// The field does not exist in the component's default shape
    Unknown {
        /// Field name
        field: String,
    },
    /// The component data itself is not a record
    NotAnObject {
        /// Kind that was provided
        found: &'static str,
    },
    /// The field exists but holds a value of the wrong kind
    TypeMismatch {
        /// Field name
        field: String,
        /// Kind declared by the default shape
        expected: &'static str,
        /// Kind that was provided
        found: &'static str,
    },
}

impl FieldIssue {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            FieldIssue::Unknown { field } | FieldIssue::TypeMismatch { field, .. } => field,
            FieldIssue::NotAnObject { .. } => "",
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::Unknown { field } => write!(f, "unknown field `{field}`"),
            FieldIssue::NotAnObject { found } => write!(f, "expected a record, found {found}"),
            FieldIssue::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expected {expected}, found {found}"),
        }
    }
}

/// Component data rejected by a validator
///
/// Shared by the builtin and script storage paths so both report the same
/// multi-field message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Component that rejected the data
    pub component: String,
    /// Every offending field, in the order they were provided
    pub issues: Vec<FieldIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid data for component `{}`:", self.component)?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors that can occur in the ECS runtime
#[derive(Error, Debug)]
pub enum EcsError {
    /// Setup is wrong: unknown parameter kind, missing native accessor, duplicate definition
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Component data does not match its declared shape
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A destructive world operation was attempted while a query is iterating
    #[error("Cannot {operation} while iterating a query; queue it on Commands instead")]
    IllegalMutation {
        /// The rejected operation
        operation: &'static str,
    },

    /// A script component was read from an entity that does not have it
    #[error("Component `{component}` not found on entity {entity}")]
    NotFound {
        /// Component name
        component: String,
        /// Entity that was queried
        entity: Entity,
    },

    /// A native accessor failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Generic error raised by a system body
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for EcsError {
    fn from(err: anyhow::Error) -> Self {
        EcsError::Other(format!("{err:#}"))
    }
}

/// Failure reported by a native backend accessor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Native call `{method}` failed: {reason}")]
pub struct BackendError {
    /// Accessor name, e.g. `addSprite`
    pub method: String,
    /// Backend supplied reason
    pub reason: String,
}

impl BackendError {
    /// Create a new backend error
    pub fn new(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for esengine_runtime operations
pub type Result<T> = std::result::Result<T, EcsError>;
