//! Module for all runtime error creation functions.
//!
//! Runtime failures are first-class values: an [`EvalError`] wrapped in
//! [`Value::Error`][crate::Value::Error] propagates through arithmetic,
//! selection, indexing, and strict function calls, and is absorbed only by
//! the logical operators and the ternary per the language rules.

use std::fmt;
use std::sync::Arc;

/// Represents a Tern runtime error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    /// The error message.
    message: String,
    /// The root cause of the error, if any.
    cause: Option<Arc<EvalError>>,
}

impl EvalError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a new error with the given message and root cause.
    pub fn with_cause(message: impl Into<String>, cause: Arc<EvalError>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause),
        }
    }

    /// Gets the message of the error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the root cause of the error, if any.
    pub fn cause(&self) -> Option<&Arc<EvalError>> {
        self.cause.as_ref()
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{message}", message = self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }

        Ok(())
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Creates an "integer overflow" error.
pub fn integer_overflow() -> EvalError {
    EvalError::new("integer overflow")
}

/// Creates an "unsigned integer overflow" error.
pub fn unsigned_overflow() -> EvalError {
    EvalError::new("unsigned integer overflow")
}

/// Creates a "division by zero" error.
pub fn division_by_zero() -> EvalError {
    EvalError::new("division by zero")
}

/// Creates a "modulus by zero" error.
pub fn modulus_by_zero() -> EvalError {
    EvalError::new("modulus by zero")
}

/// Creates a "duration overflow" error.
pub fn duration_overflow() -> EvalError {
    EvalError::new("duration overflow")
}

/// Creates a "timestamp overflow" error.
pub fn timestamp_overflow() -> EvalError {
    EvalError::new("timestamp overflow")
}

/// Creates a "no such key" error.
pub fn no_such_key(key: impl fmt::Display) -> EvalError {
    EvalError::new(format!("no such key: {key}"))
}

/// Creates a "duplicate map key" error.
pub fn duplicate_map_key(key: impl fmt::Display) -> EvalError {
    EvalError::new(format!("duplicate map key: {key}"))
}

/// Creates an "index out of range" error.
pub fn index_out_of_range(index: i64, len: usize) -> EvalError {
    EvalError::new(format!("index out of range: {index} (length {len})"))
}

/// Creates a "no such attribute" error for an unresolved variable.
pub fn no_such_attribute(name: &str) -> EvalError {
    EvalError::new(format!("no such attribute: {name}"))
}

/// Creates a "no such field" error.
pub fn no_such_field(field: &str) -> EvalError {
    EvalError::new(format!("no such field: {field}"))
}

/// Creates a "no such overload" error.
pub fn no_such_overload() -> EvalError {
    EvalError::new("no such overload")
}

/// Creates a "no implementation bound" error for an overload.
pub fn unbound_overload(id: &str) -> EvalError {
    EvalError::new(format!("no implementation bound for overload `{id}`"))
}

/// Creates a "NaN comparison" error.
pub fn nan_comparison() -> EvalError {
    EvalError::new("NaN comparison")
}

/// Creates a "cancelled" error.
pub fn cancelled() -> EvalError {
    EvalError::new("cancelled")
}

/// Creates an "iteration limit exceeded" error.
pub fn iteration_limit_exceeded() -> EvalError {
    EvalError::new("iteration limit exceeded")
}

/// Creates a "comprehensions are disabled" error.
pub fn comprehensions_disabled() -> EvalError {
    EvalError::new("comprehensions are disabled")
}

/// Creates a conversion error.
pub fn conversion(message: impl Into<String>) -> EvalError {
    EvalError::new(message)
}

/// Creates an "invalid timezone" error.
pub fn invalid_timezone(tz: &str) -> EvalError {
    EvalError::new(format!("invalid timezone `{tz}`"))
}

/// Creates a "function call failed" error with the failing function's name.
pub fn function_call_failed(function: &str, cause: Arc<EvalError>) -> EvalError {
    EvalError::with_cause(format!("function `{function}` failed"), cause)
}

/// Creates an "optional has no value" error.
pub fn optional_none_dereference() -> EvalError {
    EvalError::new("optional has no value")
}
