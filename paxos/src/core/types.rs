//! Core type definitions for the Paxos protocol
//!
//! These types are shared between the acceptor runtime, the proposer driver
//! and the durable state stores.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A Paxos decision slot, scoped by the caller (e.g. per use-case/client-key).
pub type Sequence = u64;

// =============================================================================
// PROPOSAL ID
// =============================================================================

/// Ordering key for proposals - compares by `round`, then `proposer`.
///
/// The derived ordering is lexicographic over the fields in declaration order,
/// so ties on `round` are broken by the proposer's stable identity.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProposalId {
    /// Monotonic round counter, never reused by a proposer for the same slot
    pub round: u64,
    /// Stable identity of the proposer that minted this id
    pub proposer: String,
}

impl ProposalId {
    #[must_use]
    pub fn new(round: u64, proposer: impl Into<String>) -> Self {
        Self {
            round,
            proposer: proposer.into(),
        }
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.round, self.proposer)
    }
}

// =============================================================================
// SLOT STATE
// =============================================================================

/// Per-slot acceptor state.
///
/// Contains the highest promised proposal and the accepted (proposal, value) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotState<V> {
    /// Highest promised proposal
    pub promised: Option<ProposalId>,
    /// Accepted (proposal, value) pair
    pub accepted: Option<(ProposalId, V)>,
}

impl<V> Default for SlotState<V> {
    fn default() -> Self {
        Self {
            promised: None,
            accepted: None,
        }
    }
}

// =============================================================================
// CORE MESSAGE TYPES
// =============================================================================

/// Response to a Phase 1a prepare.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrepareResponse<V> {
    /// Phase 1b: promise, carrying any previously accepted value for the slot
    Promise { accepted: Option<(ProposalId, V)> },
    /// Refused; `promised` is the conflicting promise so callers can fast-forward
    Nack { promised: ProposalId },
}

/// Response to a Phase 2a accept.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AcceptResponse {
    /// Phase 2b: the value was durably accepted
    Accepted,
    /// Refused because a higher promise has been made since
    Rejected { promised: ProposalId },
}
