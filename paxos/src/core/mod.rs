//! Synchronous protocol logic shared by the acceptor runtime and the
//! proposer driver: proposal ordering, per-slot acceptor transitions, vote
//! tallies and majority arithmetic.

pub(crate) mod acceptor;
pub(crate) mod proposer;
pub(crate) mod quorum;
pub(crate) mod types;

pub use acceptor::{AcceptorCore, decision};
pub use proposer::{AcceptPhaseResult, PreparePhaseResult, ProposerCore};
pub use quorum::majority;
pub use types::{AcceptResponse, PrepareResponse, ProposalId, Sequence, SlotState};
