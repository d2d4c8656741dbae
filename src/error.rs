//! Error types for merkle_state

use thiserror::Error;

/// Result type alias for merkle_state operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in merkle_state operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Tree is closed: {0}")]
    Closed(String),

    #[error("Tree is already open: {0}")]
    AlreadyOpen(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Storage error while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Coarse classification of an [`Error`].
///
/// Validation failures and corruption are never worth retrying; storage
/// failures may be (e.g. a `flush_to_disk` that hit a full disk).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    IllegalState,
    Storage,
}

impl Error {
    /// Wrap an IO failure with the operation that was in progress
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::Decode(_) | Error::Config(_) => {
                ErrorKind::InvalidArgument
            }
            Error::IllegalState(_)
            | Error::Closed(_)
            | Error::AlreadyOpen(_)
            | Error::Corruption(_) => ErrorKind::IllegalState,
            Error::Storage { .. } | Error::Io(_) | Error::Serialization(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::InvalidArgument("empty key".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(Error::Decode("short".into()).kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::AlreadyOpen("t1".into()).kind(), ErrorKind::IllegalState);
        assert_eq!(Error::Corruption("x".into()).kind(), ErrorKind::IllegalState);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::storage("appending batch", io);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("appending batch"));
    }

    #[test]
    fn test_only_storage_is_retryable() {
        assert!(!Error::Closed("t".into()).is_retryable());
        assert!(!Error::InvalidArgument("k".into()).is_retryable());
    }
}
