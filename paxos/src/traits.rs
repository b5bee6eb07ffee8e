//! Core Paxos traits.

use core::fmt;
use core::future::Future;
use core::hash::Hash;

use error_stack::Report;

use crate::core::{AcceptResponse, PrepareResponse, ProposalId, Sequence, SlotState};

/// Key identifying an independent Paxos log (e.g. a use-case/client-key pair).
pub trait ScopeKey: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> ScopeKey for T where T: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

/// Durable storage for acceptor slot state.
///
/// Implementations MUST make `store()` durable (fsync or equivalent) before
/// returning success. The acceptor handler serialises the read-modify-write
/// for a scope, so stores need not be atomic across `load`/`store` pairs.
pub trait AcceptorStateStore<K: ScopeKey, V>: Send + Sync + 'static {
    type Error: core::error::Error + Send + Sync + 'static;

    fn load(
        &self,
        scope: &K,
        seq: Sequence,
    ) -> impl Future<Output = Result<SlotState<V>, Report<Self::Error>>> + Send;

    fn store(
        &self,
        scope: &K,
        seq: Sequence,
        state: &SlotState<V>,
    ) -> impl Future<Output = Result<(), Report<Self::Error>>> + Send;

    /// Highest sequence with an accepted value for `scope`.
    fn highest_accepted(
        &self,
        scope: &K,
    ) -> impl Future<Output = Result<Option<Sequence>, Report<Self::Error>>> + Send;
}

/// Client handle for one acceptor's RPC surface.
///
/// Held by value by proposers; transports (in-process, TCP) implement this.
pub trait AcceptorClient<K: ScopeKey, V>: Clone + Send + Sync + 'static {
    type Error: core::error::Error + Send + Sync + 'static;

    /// Stable identifier used for logging and quorum counting.
    fn id(&self) -> &str;

    fn prepare(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
    ) -> impl Future<Output = Result<PrepareResponse<V>, Report<Self::Error>>> + Send;

    fn accept(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
        value: &V,
    ) -> impl Future<Output = Result<AcceptResponse, Report<Self::Error>>> + Send;

    fn latest_sequence(
        &self,
        scope: &K,
    ) -> impl Future<Output = Result<Option<Sequence>, Report<Self::Error>>> + Send;
}
