//! Domain types shared by acceptors and coordinators

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A leadership namespace: one Paxos log and one leader per scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub use_case: String,
    pub client_key: String,
}

impl Scope {
    pub fn new(use_case: impl Into<String>, client_key: impl Into<String>) -> Self {
        Self {
            use_case: use_case.into(),
            client_key: client_key.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.use_case, self.client_key)
    }
}

/// Leadership generation of a scope, equal to the decided Paxos sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque token minted for every leadership attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeadershipId(pub Uuid);

impl LeadershipId {
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeadershipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The value decided by each leadership round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Identity of the node that proposed itself
    pub node: String,
    pub leadership: LeadershipId,
}

/// A won leadership: the decided epoch and the id minted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Leadership {
    pub epoch: Epoch,
    pub id: LeadershipId,
}

/// Leader role of this node for one scope.
///
/// Checked before every privileged operation; fenced writes take the
/// [`Leadership`] snapshot as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderState {
    #[default]
    NotLeader,
    Leader(Leadership),
}

impl LeaderState {
    #[must_use]
    pub fn leadership(&self) -> Option<Leadership> {
        match self {
            Self::NotLeader => None,
            Self::Leader(leadership) => Some(*leadership),
        }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }
}

/// Name of a lockable resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockDescriptor(pub String);

impl LockDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Proof of a granted lease, ordered by `(epoch, counter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockToken {
    pub epoch: Epoch,
    /// Starts at 1 for every epoch and increases with each grant
    pub counter: u64,
}

impl LockToken {
    #[must_use]
    pub fn new(epoch: Epoch, counter: u64) -> Self {
        Self { epoch, counter }
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.epoch, self.counter)
    }
}

/// A time-bounded grant of exclusive access over a set of resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: LockToken,
    pub resources: BTreeSet<LockDescriptor>,
    /// Unix milliseconds; the lease is held while `now <= expires_at`
    pub expires_at: u64,
    /// Length of the grant, reused when refreshing
    pub duration_ms: u64,
}

impl Lease {
    #[must_use]
    pub fn is_live(&self, now: u64) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResponse {
    Successful { token: LockToken, lease: Lease },
    Unsuccessful,
}

impl LockResponse {
    #[must_use]
    pub fn token(&self) -> Option<LockToken> {
        match self {
            Self::Successful { token, .. } => Some(*token),
            Self::Unsuccessful => None,
        }
    }
}

/// Half-open range of timestamps `[lower, upper)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampBlock {
    pub lower: u64,
    pub upper: u64,
}

impl TimestampBlock {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.upper - self.lower
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lower == self.upper
    }

    #[must_use]
    pub fn contains(&self, ts: u64) -> bool {
        (self.lower..self.upper).contains(&ts)
    }
}
