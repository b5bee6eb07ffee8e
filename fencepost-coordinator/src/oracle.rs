//! Timestamp oracle: leader-only allocation of disjoint, strictly increasing
//! timestamp blocks.
//!
//! The persisted bound at `timestampBound/{useCase}/{clientKey}` is the
//! lowest timestamp not yet reserved by any leader. A leader claims it with
//! its epoch when it takes over, then raises it `batch_size` timestamps at a
//! time with a compare-and-swap against its own last write. Blocks are only
//! served from below a durably reserved bound.

use error_stack::{Report, ResultExt};
use fencepost_core::records::{self, BoundRecord, keys};
use fencepost_core::{
    Epoch, EpochContext, KvStore, Leadership, OperationContext, Scope, ScopeContext,
    TimestampBlock,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::OracleConfig;
use crate::error::CoordinationError;
use crate::fence::Fence;

#[derive(Debug, Default)]
struct OracleState {
    /// Epoch the oracle was seeded for; `None` forces a reseed
    epoch: Option<Epoch>,
    next: u64,
    reserved: u64,
    /// Bytes of our last write to the bound record
    raw: Vec<u8>,
}

pub struct TimestampOracle<S> {
    scope: Scope,
    store: S,
    fence: Fence<S>,
    batch_size: u64,
    state: Mutex<OracleState>,
}

impl<S: KvStore> TimestampOracle<S> {
    pub fn new(scope: Scope, store: S, config: &OracleConfig) -> Self {
        Self {
            scope,
            fence: Fence::new(store.clone()),
            store,
            batch_size: config.batch_size.max(1),
            state: Mutex::new(OracleState::default()),
        }
    }

    /// Load the persisted bound and claim it for `leadership`.
    ///
    /// # Errors
    /// `LostLeadership` if a newer epoch already owns the bound or the scope.
    #[instrument(skip_all, fields(scope = %self.scope, epoch = %leadership.epoch))]
    pub async fn seed(&self, leadership: &Leadership) -> Result<(), Report<CoordinationError>> {
        let mut state = self.state.lock().await;
        self.seed_locked(&mut state, leadership).await
    }

    async fn seed_locked(
        &self,
        state: &mut OracleState,
        leadership: &Leadership,
    ) -> Result<(), Report<CoordinationError>> {
        state.epoch = None;
        self.fence.check(&self.scope, leadership).await?;

        let key = keys::timestamp_bound(&self.scope);
        let current = records::read_record::<_, BoundRecord>(&self.store, &key)
            .await
            .change_context(CoordinationError::STORE)
            .attach(OperationContext::SEEDING_ORACLE)?;

        if let Some(current) = &current
            && current.value.epoch > leadership.epoch
        {
            return Err(self.lost(current.value.epoch));
        }

        let upper = current.as_ref().map_or(0, |c| c.value.upper);
        let claim = records::encode(&BoundRecord {
            epoch: leadership.epoch,
            upper,
        })
        .change_context(CoordinationError::STORE)?;
        let swapped = self
            .store
            .compare_and_swap(&key, current.as_ref().map(|c| c.raw.as_slice()), &claim)
            .await
            .change_context(CoordinationError::STORE)
            .attach(OperationContext::SEEDING_ORACLE)?;
        if !swapped {
            return Err(self.lost(leadership.epoch));
        }

        debug!(upper, "oracle seeded");
        *state = OracleState {
            epoch: Some(leadership.epoch),
            next: upper,
            reserved: upper,
            raw: claim,
        };
        Ok(())
    }

    fn lost(&self, newer: Epoch) -> Report<CoordinationError> {
        Report::new(CoordinationError::LOST_LEADERSHIP)
            .attach(ScopeContext::new(&self.scope))
            .attach(EpochContext::new(newer))
            .attach("timestamp bound claimed by another leader")
    }

    /// Allocate `count` consecutive timestamps.
    ///
    /// # Errors
    /// `InvalidRequest` for a zero count, `LostLeadership` when fenced out.
    /// On error no part of the block may be used.
    #[instrument(skip_all, fields(scope = %self.scope, epoch = %leadership.epoch, count))]
    pub async fn allocate(
        &self,
        leadership: &Leadership,
        count: u64,
    ) -> Result<TimestampBlock, Report<CoordinationError>> {
        if count == 0 {
            return Err(Report::new(CoordinationError::INVALID_REQUEST)
                .attach("timestamp count must be positive"));
        }

        let mut state = self.state.lock().await;
        if state.epoch != Some(leadership.epoch) {
            self.seed_locked(&mut state, leadership).await?;
        }
        self.fence.check(&self.scope, leadership).await?;

        let end = state.next.checked_add(count).ok_or_else(|| {
            Report::new(CoordinationError::INVALID_REQUEST).attach("timestamp space exhausted")
        })?;

        if end > state.reserved {
            let upper = end.max(state.next.saturating_add(self.batch_size));
            let bytes = records::encode(&BoundRecord {
                epoch: leadership.epoch,
                upper,
            })
            .change_context(CoordinationError::STORE)?;

            let swapped = self
                .store
                .compare_and_swap(&keys::timestamp_bound(&self.scope), Some(state.raw.as_slice()), &bytes)
                .await
                .change_context(CoordinationError::STORE)
                .attach(OperationContext::ALLOCATING_TIMESTAMPS)?;
            if !swapped {
                state.epoch = None;
                return Err(self.lost(leadership.epoch));
            }

            debug!(from = state.reserved, to = upper, "reserved timestamps");
            state.reserved = upper;
            state.raw = bytes;
        }

        let block = TimestampBlock {
            lower: state.next,
            upper: end,
        };
        state.next = end;
        Ok(block)
    }
}
