//! Error types and structured `error_stack` context types.

use std::fmt;

use crate::{Epoch, Scope};

/// Marker error for external store failures. Use `error_stack::Report<StoreError>`
/// with context attachments for details.
#[derive(Debug)]
pub struct StoreError;

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("store operation failed")
    }
}

impl std::error::Error for StoreError {}

/// Network connection error.
#[derive(Debug)]
pub enum ConnectorError {
    Connect(String),
    Codec(String),
    Io(std::io::Error),
    /// The peer closed the stream before answering
    Closed,
    /// The acceptor answered with a failure of its own
    Remote(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Connect(e) => write!(f, "connection failed: {e}"),
            ConnectorError::Codec(e) => write!(f, "codec error: {e}"),
            ConnectorError::Io(e) => write!(f, "IO error: {e}"),
            ConnectorError::Closed => f.write_str("connection closed by peer"),
            ConnectorError::Remote(e) => write!(f, "acceptor error: {e}"),
        }
    }
}

impl std::error::Error for ConnectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(e: std::io::Error) -> Self {
        ConnectorError::Io(e)
    }
}

/// Error context: scope.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    pub scope: Scope,
}

impl ScopeContext {
    #[must_use]
    pub fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.clone(),
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope: {}", self.scope)
    }
}

/// Error context: epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochContext {
    pub epoch: Epoch,
}

impl EpochContext {
    #[must_use]
    pub fn new(epoch: Epoch) -> Self {
        Self { epoch }
    }
}

impl fmt::Display for EpochContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch: {}", self.epoch.0)
    }
}

/// Error context: store key.
#[derive(Debug, Clone)]
pub struct KeyContext {
    pub key: String,
}

impl KeyContext {
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
        }
    }
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key: {}", self.key)
    }
}

/// Error context: what operation was in progress.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation: &'static str,
}

impl OperationContext {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "while {}", self.operation)
    }
}

impl OperationContext {
    pub const ELECTING: Self = Self {
        operation: "electing a leader",
    };
    pub const CLAIMING_FENCE: Self = Self {
        operation: "claiming the fence record",
    };
    pub const SEEDING_ORACLE: Self = Self {
        operation: "seeding the timestamp oracle",
    };
    pub const ALLOCATING_TIMESTAMPS: Self = Self {
        operation: "allocating timestamps",
    };
    pub const ACQUIRING_LOCK: Self = Self {
        operation: "acquiring a lock",
    };
    pub const REFRESHING_LOCK: Self = Self {
        operation: "refreshing a lock",
    };
    pub const RELEASING_LOCK: Self = Self {
        operation: "releasing locks",
    };
    pub const LOADING_SLOT: Self = Self {
        operation: "loading acceptor slot",
    };
    pub const STORING_SLOT: Self = Self {
        operation: "storing acceptor slot",
    };
    pub const CONNECTING: Self = Self {
        operation: "connecting to acceptor",
    };
}
