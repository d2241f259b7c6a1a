//! Error types for the circuit breaker library.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::state::State;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error type for circuit breaker operations.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit refused the call.
    Open(CircuitOpenError),

    /// The underlying operation failed.
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns true when the call never reached the operation.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// Returns the operation error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(err: CircuitOpenError) -> Self {
        BreakerError::Open(err)
    }
}

impl<E> Display for BreakerError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open(e) => write!(f, "{}", e),
            BreakerError::Operation(e) => write!(f, "Operation error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Open(e) => Some(e),
            BreakerError::Operation(e) => Some(e),
        }
    }
}

/// Raised when a breaker blocks a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    /// Name of the breaker that blocked the call.
    pub name: String,
    /// State the breaker was in when it blocked.
    pub state: State,
}

impl Display for CircuitOpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit breaker '{}' is {}, request blocked",
            self.name, self.state
        )
    }
}

impl Error for CircuitOpenError {}

/// Errors raised while building a breaker from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The requested breaker type does not exist.
    UnknownKind(String),

    /// A configuration entry holds a value of the wrong type.
    WrongType {
        /// Configuration key.
        key: String,
        /// What the key expects.
        expected: &'static str,
    },

    /// A configuration entry is outside its valid range.
    OutOfRange {
        /// Configuration key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownKind(kind) => write!(f, "Unknown circuit breaker type: {}", kind),
            ConfigError::WrongType { key, expected } => {
                write!(f, "Configuration key '{}' expects {}", key, expected)
            }
            ConfigError::OutOfRange { key, reason } => {
                write!(f, "Configuration key '{}' is out of range: {}", key, reason)
            }
        }
    }
}

impl Error for ConfigError {}
