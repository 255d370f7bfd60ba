//! Recoverable errors for the read-mostly lock.
//!
//! Misuse of the lock (thread-affinity violations, unbalanced lock/unlock,
//! reentrant write locking) is not represented here: it panics at the call
//! site, because a lock in that state has no recovery path.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An impatient reader gave up because a write is pending.
    CannotRunReadAction,
    /// The host reported the current operation as cancelled while the reader was blocked.
    OperationCancelled,
    /// A configuration value was rejected.
    InvalidConfig(String),
}

impl Error {
    /// True for the contention conditions a caller is expected to retry from scratch.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::CannotRunReadAction | Error::OperationCancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CannotRunReadAction => {
                write!(f, "cannot run read action: a write is pending and the reader is impatient")
            }
            Error::OperationCancelled => write!(f, "operation cancelled while waiting for read access"),
            Error::InvalidConfig(msg) => write!(f, "invalid lock configuration: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::InvalidConfig(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::InvalidConfig(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_is_cancellation() {
        assert!(Error::CannotRunReadAction.is_cancellation());
        assert!(Error::OperationCancelled.is_cancellation());
        assert!(!Error::InvalidConfig("x".into()).is_cancellation());
        assert!(Error::InvalidConfig("zero".into()).to_string().contains("zero"));
    }
}
