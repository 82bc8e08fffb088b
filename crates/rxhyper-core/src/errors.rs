//! Unified error system for rxhyper
//!
//! One error type covers capability resolution, subsystem bootstrap, transport
//! failures, and caller misuse. Errors are `Clone` so a single bootstrap
//! failure can be handed to every caller that awaited it.

use serde::{Deserialize, Serialize};

/// Unified error type for all rxhyper operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RxError {
    /// A required capability could not be obtained
    #[error("Non-optional dependency '{name}' could not be resolved: {message}")]
    Resolution {
        /// Capability name that failed to resolve
        name: String,
        /// Underlying failure
        message: String,
    },

    /// A subsystem bootstrap failed after acquiring its capabilities
    #[error("Initialization of '{subsystem}' failed: {message}")]
    Initialization {
        /// Subsystem whose bootstrap failed
        subsystem: String,
        /// Underlying failure
        message: String,
    },

    /// A byte duplex raised an error
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport failure
        message: String,
    },

    /// Invalid combination of arguments
    #[error("Usage error: {message}")]
    Usage {
        /// Error message describing the misuse
        message: String,
    },

    /// Operation on a closed log, store, or transport
    #[error("{resource} is closed")]
    Closed {
        /// The resource that was closed
        resource: String,
    },

    /// Storage backend failure
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Value encoding or decoding failure
    #[error("Codec error: {message}")]
    Codec {
        /// Error message describing the codec failure
        message: String,
    },

    /// Requested item does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },
}

impl RxError {
    /// Create a resolution error for the named capability
    pub fn resolution(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an initialization error for the named subsystem
    pub fn initialization(subsystem: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Initialization {
            subsystem: subsystem.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a closed-resource error
    pub fn closed(resource: impl Into<String>) -> Self {
        Self::Closed {
            resource: resource.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Whether this error reports a closed resource
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Standard Result type for rxhyper operations
pub type RxResult<T> = std::result::Result<T, RxError>;

impl From<serde_json::Error> for RxError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

impl From<toml::de::Error> for RxError {
    fn from(err: toml::de::Error) -> Self {
        Self::usage(format!("Invalid settings: {err}"))
    }
}

impl From<std::io::Error> for RxError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                Self::transport(err.to_string())
            }
            _ => Self::storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn resolution_message_names_capability() {
        let err = RxError::resolution("codec", "loader refused");
        assert_eq!(
            err.to_string(),
            "Non-optional dependency 'codec' could not be resolved: loader refused"
        );
    }

    #[test]
    fn io_errors_map_by_kind() {
        let err: RxError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_matches!(err, RxError::NotFound { .. });

        let err: RxError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_matches!(err, RxError::Transport { .. });
    }

    #[test]
    fn closed_predicate() {
        assert!(RxError::closed("log").is_closed());
        assert!(!RxError::usage("bad").is_closed());
    }
}
