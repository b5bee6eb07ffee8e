use std::fmt;

/// What went wrong with a coordination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A newer epoch has claimed the scope; this node must stop serving it
    LostLeadership,
    /// This node does not currently lead the scope
    NotLeader,
    /// Empty resource set, zero count, zero lease duration
    InvalidRequest,
    /// No majority of acceptors answered
    QuorumUnavailable,
    /// The external store failed or returned a corrupt record
    Store,
    /// A token names an epoch this scope never granted
    UnknownEpoch,
}

/// Error for coordination operations. Use `error_stack::Report<CoordinationError>`
/// with context attachments for details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinationError {
    kind: ErrorKind,
}

impl CoordinationError {
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl CoordinationError {
    pub const LOST_LEADERSHIP: Self = Self {
        kind: ErrorKind::LostLeadership,
    };
    pub const NOT_LEADER: Self = Self {
        kind: ErrorKind::NotLeader,
    };
    pub const INVALID_REQUEST: Self = Self {
        kind: ErrorKind::InvalidRequest,
    };
    pub const QUORUM_UNAVAILABLE: Self = Self {
        kind: ErrorKind::QuorumUnavailable,
    };
    pub const STORE: Self = Self {
        kind: ErrorKind::Store,
    };
    pub const UNKNOWN_EPOCH: Self = Self {
        kind: ErrorKind::UnknownEpoch,
    };
}

impl From<ErrorKind> for CoordinationError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for CoordinationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.kind {
            ErrorKind::LostLeadership => "leadership lost to a newer epoch",
            ErrorKind::NotLeader => "not the leader of this scope",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::QuorumUnavailable => "no quorum of acceptors available",
            ErrorKind::Store => "store operation failed",
            ErrorKind::UnknownEpoch => "token from an epoch this scope never granted",
        })
    }
}

impl std::error::Error for CoordinationError {}
