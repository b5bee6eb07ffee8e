//! Acceptor runtime: protocol handling, state persistence, and an
//! in-process client handle.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use error_stack::Report;

use crate::core::{AcceptResponse, AcceptorCore, PrepareResponse, ProposalId, Sequence, SlotState};
use crate::traits::{AcceptorClient, AcceptorStateStore, ScopeKey};

mod handler;

pub use handler::AcceptorHandler;

/// Default in-memory acceptor state using `Arc<Mutex>`.
///
/// Not durable; useful for tests and single-process clusters.
pub struct MemoryAcceptorState<K: ScopeKey, V> {
    core: Arc<Mutex<AcceptorCore<(K, Sequence), V>>>,
}

impl<K: ScopeKey, V> Clone for MemoryAcceptorState<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<K: ScopeKey, V> Default for MemoryAcceptorState<K, V> {
    fn default() -> Self {
        Self {
            core: Arc::new(Mutex::new(AcceptorCore::default())),
        }
    }
}

impl<K: ScopeKey, V> MemoryAcceptorState<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V> AcceptorStateStore<K, V> for MemoryAcceptorState<K, V>
where
    K: ScopeKey,
    V: Clone + Send + Sync + 'static,
{
    type Error = Infallible;

    async fn load(&self, scope: &K, seq: Sequence) -> Result<SlotState<V>, Report<Infallible>> {
        let core = self.core.lock().unwrap();
        Ok(core.get(&(scope.clone(), seq)))
    }

    async fn store(
        &self,
        scope: &K,
        seq: Sequence,
        state: &SlotState<V>,
    ) -> Result<(), Report<Infallible>> {
        let mut core = self.core.lock().unwrap();
        core.set((scope.clone(), seq), state.clone());
        Ok(())
    }

    async fn highest_accepted(&self, scope: &K) -> Result<Option<Sequence>, Report<Infallible>> {
        let core = self.core.lock().unwrap();
        Ok(core
            .highest_accepted_in((scope.clone(), 0)..=(scope.clone(), Sequence::MAX))
            .map(|(_, seq)| *seq))
    }
}

/// In-process [`AcceptorClient`] calling straight into a shared handler.
pub struct LocalAcceptor<K, V, S> {
    id: Arc<str>,
    handler: Arc<AcceptorHandler<K, V, S>>,
}

impl<K, V, S> Clone for LocalAcceptor<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<K, V, S> LocalAcceptor<K, V, S>
where
    K: ScopeKey,
    V: Clone + Send + Sync + 'static,
    S: AcceptorStateStore<K, V>,
{
    pub fn new(id: impl Into<Arc<str>>, handler: AcceptorHandler<K, V, S>) -> Self {
        Self::shared(id, Arc::new(handler))
    }

    pub fn shared(id: impl Into<Arc<str>>, handler: Arc<AcceptorHandler<K, V, S>>) -> Self {
        Self {
            id: id.into(),
            handler,
        }
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<AcceptorHandler<K, V, S>> {
        &self.handler
    }
}

impl<K, V, S> AcceptorClient<K, V> for LocalAcceptor<K, V, S>
where
    K: ScopeKey,
    V: Clone + Send + Sync + 'static,
    S: AcceptorStateStore<K, V>,
{
    type Error = S::Error;

    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
    ) -> Result<PrepareResponse<V>, Report<S::Error>> {
        self.handler.handle_prepare(scope, seq, proposal).await
    }

    async fn accept(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
        value: &V,
    ) -> Result<AcceptResponse, Report<S::Error>> {
        self.handler
            .handle_accept(scope, seq, proposal, value.clone())
            .await
    }

    async fn latest_sequence(&self, scope: &K) -> Result<Option<Sequence>, Report<S::Error>> {
        self.handler.latest_sequence(scope).await
    }
}
