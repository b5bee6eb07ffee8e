//! Acceptor handler for processing Paxos protocol messages.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use error_stack::Report;
use tokio::sync::OwnedMutexGuard;
use tracing::{instrument, trace};

use crate::core::{AcceptResponse, PrepareResponse, ProposalId, Sequence};
use crate::traits::{AcceptorStateStore, ScopeKey};

type ScopeLock = Arc<tokio::sync::Mutex<()>>;
type ScopeLocks<K> = Mutex<HashMap<K, ScopeLock>>;

/// Exclusive hold on one scope. On drop the scope's mutex is forgotten if
/// no other request holds or waits on it, so the map only tracks busy scopes.
struct ScopeGuard<'a, K: ScopeKey> {
    locks: &'a ScopeLocks<K>,
    scope: K,
    lock: ScopeLock,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: ScopeKey> Drop for ScopeGuard<'_, K> {
    fn drop(&mut self) {
        // Unlock first, so a newcomer on a fresh mutex cannot overlap us
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap();
        if let Some(current) = locks.get(&self.scope)
            && Arc::ptr_eq(current, &self.lock)
            && Arc::strong_count(&self.lock) == 2
        {
            locks.remove(&self.scope);
        }
    }
}

/// Answers prepare/accept requests against a durable [`AcceptorStateStore`].
///
/// Requests for the same scope are serialised by a per-scope mutex so the
/// load → transition → store sequence is atomic; different scopes proceed
/// concurrently.
pub struct AcceptorHandler<K, V, S> {
    store: S,
    locks: ScopeLocks<K>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V, S> AcceptorHandler<K, V, S>
where
    K: ScopeKey,
    V: Clone + Send + Sync + 'static,
    S: AcceptorStateStore<K, V>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn lock_scope(&self, scope: &K) -> ScopeGuard<'_, K> {
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry(scope.clone())
            .or_default()
            .clone();
        let mut held = ScopeGuard {
            locks: &self.locks,
            scope: scope.clone(),
            lock,
            guard: None,
        };
        held.guard = Some(held.lock.clone().lock_owned().await);
        held
    }

    #[cfg(test)]
    fn tracked_scopes(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Phase 1b. The new promise is durable before the response is returned.
    #[instrument(skip_all, fields(?scope, seq, %proposal))]
    pub async fn handle_prepare(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
    ) -> Result<PrepareResponse<V>, Report<S::Error>> {
        let _held = self.lock_scope(scope).await;

        let mut state = self.store.load(scope, seq).await?;
        let (response, changed) = state.prepare(proposal);
        if changed {
            self.store.store(scope, seq, &state).await?;
            trace!("promised");
        } else {
            trace!("prepare nacked - outdated");
        }
        Ok(response)
    }

    /// Phase 2b. The accepted value is durable before the response is returned.
    #[instrument(skip_all, fields(?scope, seq, %proposal))]
    pub async fn handle_accept(
        &self,
        scope: &K,
        seq: Sequence,
        proposal: &ProposalId,
        value: V,
    ) -> Result<AcceptResponse, Report<S::Error>> {
        let _held = self.lock_scope(scope).await;

        let mut state = self.store.load(scope, seq).await?;
        let (response, changed) = state.accept(proposal, value);
        if changed {
            self.store.store(scope, seq, &state).await?;
            trace!("accepted");
        } else {
            trace!("accept rejected - outdated");
        }
        Ok(response)
    }

    pub async fn latest_sequence(&self, scope: &K) -> Result<Option<Sequence>, Report<S::Error>> {
        self.store.highest_accepted(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::MemoryAcceptorState;

    type Handler = AcceptorHandler<String, u64, MemoryAcceptorState<String, u64>>;

    #[tokio::test]
    async fn test_idle_scopes_are_forgotten() {
        let handler = Handler::new(MemoryAcceptorState::new());
        for i in 0..100 {
            let scope = format!("scope-{i}");
            let proposal = ProposalId::new(1, "p");
            handler.handle_prepare(&scope, 1, &proposal).await.unwrap();
            handler.handle_accept(&scope, 1, &proposal, i).await.unwrap();
        }
        assert_eq!(handler.tracked_scopes(), 0);
        assert_eq!(handler.latest_sequence(&"scope-7".to_owned()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_requests_on_one_scope_are_serialised() {
        let handler = Arc::new(Handler::new(MemoryAcceptorState::new()));
        let scope = "shared".to_owned();

        let tasks: Vec<_> = (1..=20)
            .map(|round| {
                let handler = handler.clone();
                let scope = scope.clone();
                tokio::spawn(async move {
                    let proposal = ProposalId::new(round, "p");
                    handler.handle_prepare(&scope, 1, &proposal).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(handler.tracked_scopes(), 0);
        let state = handler.store().load(&scope, 1).await.unwrap();
        assert_eq!(state.promised, Some(ProposalId::new(20, "p")));
    }
}
