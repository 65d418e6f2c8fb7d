//! Error types for registry operations

use thiserror::Error;

/// Rejections and failures surfaced by the registry.
///
/// Every rejection leaves the registry state exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("{limit} timer(s) already exist(s)")]
    CapacityExceeded { limit: usize },

    #[error("capacity {requested} out of range (1..={max})")]
    OutOfRange { requested: usize, max: usize },

    #[error("capacity {requested} is below the {active} active timer(s)")]
    BelowActiveCount { requested: usize, active: usize },

    #[error("no clock source available (not inside a tokio runtime)")]
    ClockUnavailable,

    #[error("timer registry has shut down")]
    Closed,
}

impl RegistryError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RegistryError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Errors during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration")]
    Load(#[from] confy::ConfyError),

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Errors while decoding a protocol line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    #[error("request longer than {max} bytes")]
    LineTooLong { max: usize },

    #[error("request is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{command} requires {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("'{value}' is not a valid {what}")]
    InvalidNumber { what: &'static str, value: String },
}
