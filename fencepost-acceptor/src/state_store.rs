//! Acceptor slot state kept in an external [`KvStore`].

use error_stack::{Report, ResultExt};
use fencepost_core::records::{self, keys};
use fencepost_core::{Candidate, KeyContext, KvStore, OperationContext, Scope, StoreError};
use fencepost_paxos::{AcceptorStateStore, Sequence, SlotState};
use tracing::trace;

/// Persists promises and accepted values under
/// `acceptor/{useCase}/{clientKey}/{seq}`, plus a per-scope index of the
/// highest accepted sequence.
#[derive(Clone, Debug)]
pub struct KvAcceptorStore<S> {
    store: S,
}

impl<S: KvStore> KvAcceptorStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    async fn raise_latest(&self, scope: &Scope, seq: Sequence) -> Result<(), Report<StoreError>> {
        let key = keys::acceptor_latest(scope);
        loop {
            let current = records::read_record::<_, Sequence>(&self.store, &key).await?;
            if current.as_ref().is_some_and(|latest| latest.value >= seq) {
                return Ok(());
            }
            let expected = current.as_ref().map(|latest| latest.raw.as_slice());
            if self
                .store
                .compare_and_swap(&key, expected, &records::encode(&seq)?)
                .await?
            {
                trace!(?scope, seq, "raised latest accepted sequence");
                return Ok(());
            }
        }
    }
}

impl<S: KvStore> AcceptorStateStore<Scope, Candidate> for KvAcceptorStore<S> {
    type Error = StoreError;

    async fn load(
        &self,
        scope: &Scope,
        seq: Sequence,
    ) -> Result<SlotState<Candidate>, Report<StoreError>> {
        let key = keys::acceptor_slot(scope, seq);
        let stored = records::read_record(&self.store, &key)
            .await
            .attach(OperationContext::LOADING_SLOT)?;
        Ok(stored.map(|slot| slot.value).unwrap_or_default())
    }

    async fn store(
        &self,
        scope: &Scope,
        seq: Sequence,
        state: &SlotState<Candidate>,
    ) -> Result<(), Report<StoreError>> {
        let key = keys::acceptor_slot(scope, seq);
        let current = self.store.read(&key).await?;
        let swapped = self
            .store
            .compare_and_swap(&key, current.as_deref(), &records::encode(state)?)
            .await
            .attach(OperationContext::STORING_SLOT)?;
        if !swapped {
            return Err(Report::new(StoreError)
                .attach(KeyContext::new(&key))
                .attach("slot changed underneath the acceptor"));
        }

        if state.accepted.is_some() {
            self.raise_latest(scope, seq).await?;
        }
        Ok(())
    }

    async fn highest_accepted(&self, scope: &Scope) -> Result<Option<Sequence>, Report<StoreError>> {
        let key = keys::acceptor_latest(scope);
        let latest = records::read_record::<_, Sequence>(&self.store, &key).await?;
        Ok(latest.map(|latest| latest.value))
    }
}

#[cfg(test)]
mod tests {
    use fencepost_core::{LeadershipId, MemoryKvStore};
    use fencepost_paxos::ProposalId;

    use super::*;

    fn candidate() -> Candidate {
        Candidate {
            node: "n1".into(),
            leadership: LeadershipId::random(),
        }
    }

    #[tokio::test]
    async fn test_missing_slot_loads_empty() {
        let store = KvAcceptorStore::new(MemoryKvStore::new());
        let slot = store.load(&Scope::new("u", "c"), 4).await.unwrap();
        assert_eq!(slot, SlotState::default());
    }

    #[tokio::test]
    async fn test_promise_alone_does_not_move_latest() {
        let store = KvAcceptorStore::new(MemoryKvStore::new());
        let scope = Scope::new("u", "c");
        let slot = SlotState {
            promised: Some(ProposalId::new(1, "p")),
            accepted: None,
        };
        store.store(&scope, 3, &slot).await.unwrap();

        assert_eq!(store.load(&scope, 3).await.unwrap(), slot);
        assert_eq!(store.highest_accepted(&scope).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_only_moves_forward() {
        let store = KvAcceptorStore::new(MemoryKvStore::new());
        let scope = Scope::new("u", "c");
        let proposal = ProposalId::new(1, "p");
        let slot = SlotState {
            promised: Some(proposal.clone()),
            accepted: Some((proposal, candidate())),
        };

        store.store(&scope, 5, &slot).await.unwrap();
        store.store(&scope, 2, &slot).await.unwrap();
        assert_eq!(store.highest_accepted(&scope).await.unwrap(), Some(5));

        let other = Scope::new("u", "d");
        assert_eq!(store.highest_accepted(&other).await.unwrap(), None);
    }
}
