//! Error types and handling for the dispatch engine
//!
//! This module defines all error types used throughout the crate. Errors that
//! cross a thread boundary (command failures delivered to the completion
//! notifier) are plain values, never panics.

use crate::core::types::ResourceId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the dispatch engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command factory errors
    #[error("Command factory error: {0}")]
    Factory(#[from] FactoryError),

    /// Command execution errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Resource lookup and mutation errors
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single misconfiguration found while validating a command set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingProblem {
    /// The operation has no entry at all (neither a constructor nor "unsupported")
    Missing(&'static str),
    /// The constructor exists but could not produce a command
    Instantiation {
        /// Operation name
        operation: &'static str,
        /// Why construction failed
        reason: String,
    },
}

impl fmt::Display for BindingProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingProblem::Missing(op) => write!(f, "no binding for '{}'", op),
            BindingProblem::Instantiation { operation, reason } => {
                write!(f, "cannot instantiate '{}': {}", operation, reason)
            }
        }
    }
}

/// Command factory errors
#[derive(Error, Debug)]
pub enum FactoryError {
    /// The keyword does not name a registered command set
    #[error("unknown command set '{0}'")]
    UnknownCommandSet(String),

    /// `init` was already called on this factory
    #[error("{factory} factory is already initialized")]
    AlreadyInitialized {
        /// Which factory (lifecycle or query)
        factory: &'static str,
    },

    /// `get` was called before a successful `init`
    #[error("{factory} factory is not initialized")]
    NotInitialized {
        /// Which factory (lifecycle or query)
        factory: &'static str,
    },

    /// The command set failed the completeness check
    #[error("command set '{command_set}' is invalid: {}", join_problems(.problems))]
    Validation {
        /// Keyword of the command set that was validated
        command_set: String,
        /// Every problem found, in operation order
        problems: Vec<BindingProblem>,
    },

    /// A constructor that passed validation failed later
    #[error("cannot instantiate '{operation}': {reason}")]
    Instantiation {
        /// Operation name
        operation: &'static str,
        /// Why construction failed
        reason: String,
    },
}

fn join_problems(problems: &[BindingProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while executing a command against a backend
#[derive(Error, Debug)]
pub enum CommandError {
    /// The backend reported a failure
    #[error("{operation} failed at backend: {message}")]
    Backend {
        /// Operation name
        operation: &'static str,
        /// Backend-supplied message
        message: String,
    },

    /// The backend program exited unsuccessfully
    #[error("{operation} exited with {}: {stderr}", display_code(.code))]
    Exited {
        /// Operation name
        operation: &'static str,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The backend program could not be launched
    #[error("{operation} could not be launched: {source}")]
    Spawn {
        /// Operation name
        operation: &'static str,
        /// Underlying launch error
        #[source]
        source: std::io::Error,
    },

    /// The command panicked while executing
    #[error("{operation} panicked: {message}")]
    Panicked {
        /// Operation name
        operation: &'static str,
        /// Panic payload, if it was a string
        message: String,
    },

    /// `execute` was called before `set_request_context`
    #[error("{operation} executed without a request context")]
    MissingContext {
        /// Operation name
        operation: &'static str,
    },

    /// The configured command set does not implement the operation
    #[error("{operation} is not supported by command set '{command_set}'")]
    Unsupported {
        /// Operation name
        operation: &'static str,
        /// Active command set keyword
        command_set: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Resource lookup and mutation errors
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The resource no longer exists
    #[error("resource {0} not found")]
    NotFound(ResourceId),

    /// The resource lock could not be acquired in time
    #[error("timed out after {waited:?} acquiring lock on resource {id}")]
    LockTimeout {
        /// Resource whose lock was contended
        id: ResourceId,
        /// How long the caller waited
        waited: Duration,
    },

    /// Any other failure reported by the resource layer
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error should stop the service from accepting traffic
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Factory(_))
    }
}
