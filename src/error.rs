use crate::types::Operator;
use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, NadError>;

/// Errors that can occur when talking to a NAD receiver
#[derive(Error, Debug)]
pub enum NadError {
    /// A command was rejected by the command grammar before it was sent
    #[error("Invalid command: {0}")]
    Validation(#[from] ValidationError),

    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting to the device timed out
    #[error("Connect timeout")]
    Timeout,

    /// The connection went away while an operation was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection loop was stopped by the caller
    #[error("Cancelled")]
    Cancelled,

    /// `run()` was called while another connection loop is live
    #[error("Connection loop is already running")]
    AlreadyRunning,
}

impl NadError {
    /// Whether the reconnect loop should retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NadError::Io(_) | NadError::Timeout)
    }
}

/// A command that does not fit the command grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("operator '{operator}' is not supported by '{key}'")]
    UnsupportedOperator { key: String, operator: Operator },

    #[error("'{0}=' requires a value")]
    MissingValue(String),

    #[error("operator '{operator}' cannot be called with a value on '{key}'")]
    UnexpectedValue { key: String, operator: Operator },

    #[error("value '{value}' is not valid for '{key}'")]
    InvalidValue { key: String, value: String },
}

/// A status line the device sent that could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed line '{0}'")]
    MalformedLine(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("cannot convert '{value}' for '{key}'")]
    TypeCoercionFailed { key: String, value: String },
}

/// A command table entry that failed its load-time checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("malformed command key '{0}'")]
    MalformedKey(String),

    #[error("command key '{0}' is declared twice")]
    DuplicateKey(String),

    #[error("'{0}' declares no operators")]
    NoOperators(String),

    #[error("boolean command '{0}' needs a two-value domain")]
    BadBoolDomain(String),

    #[error("domain of '{0}' does not match its value type")]
    DomainTypeMismatch(String),
}
