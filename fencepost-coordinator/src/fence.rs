//! Scope fence record: the newest epoch that claimed a scope.
//!
//! Every fenced write reads the fence first and refuses to proceed when a
//! newer epoch has claimed the scope since the caller won leadership.

use error_stack::{Report, ResultExt};
use fencepost_core::records::{self, FenceRecord, keys};
use fencepost_core::{EpochContext, KvStore, Leadership, OperationContext, Scope, ScopeContext};
use tracing::{debug, instrument};

use crate::error::CoordinationError;

#[derive(Clone, Debug)]
pub struct Fence<S> {
    store: S,
}

impl<S: KvStore> Fence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Current fence record of `scope`, if any leader ever claimed it.
    ///
    /// # Errors
    /// Fails on store errors.
    pub async fn current(&self, scope: &Scope) -> Result<Option<FenceRecord>, Report<CoordinationError>> {
        let stored = records::read_record(&self.store, &keys::fence(scope))
            .await
            .change_context(CoordinationError::STORE)?;
        Ok(stored.map(|record| record.value))
    }

    /// Raise the fence of `scope` to `leadership`.
    ///
    /// Returns `false` when the fence already names a newer epoch, in which
    /// case this leadership is stale before it serves anything.
    ///
    /// # Errors
    /// Fails on store errors.
    #[instrument(skip_all, fields(%scope, epoch = %leadership.epoch))]
    pub async fn claim(
        &self,
        scope: &Scope,
        leadership: &Leadership,
    ) -> Result<bool, Report<CoordinationError>> {
        let key = keys::fence(scope);
        let claim = FenceRecord {
            epoch: leadership.epoch,
            leadership: leadership.id,
        };
        let bytes = records::encode(&claim).change_context(CoordinationError::STORE)?;

        loop {
            let current = records::read_record::<_, FenceRecord>(&self.store, &key)
                .await
                .change_context(CoordinationError::STORE)
                .attach(OperationContext::CLAIMING_FENCE)?;

            if let Some(current) = &current
                && current.value.epoch >= leadership.epoch
            {
                let ours = current.value == claim;
                debug!(fenced_at = %current.value.epoch, ours, "fence already at or past epoch");
                return Ok(ours);
            }

            let swapped = self
                .store
                .compare_and_swap(&key, current.as_ref().map(|c| c.raw.as_slice()), &bytes)
                .await
                .change_context(CoordinationError::STORE)
                .attach(OperationContext::CLAIMING_FENCE)?;
            if swapped {
                debug!("fence claimed");
                return Ok(true);
            }
        }
    }

    /// Fail with `LostLeadership` if a newer epoch has claimed `scope`.
    ///
    /// # Errors
    /// `LostLeadership` when fenced out, `Store` on store errors.
    pub async fn check(
        &self,
        scope: &Scope,
        leadership: &Leadership,
    ) -> Result<(), Report<CoordinationError>> {
        match self.current(scope).await? {
            Some(record) if record.epoch > leadership.epoch => {
                debug!(%scope, ours = %leadership.epoch, newer = %record.epoch, "fenced out");
                Err(Report::new(CoordinationError::LOST_LEADERSHIP)
                    .attach(ScopeContext::new(scope))
                    .attach(EpochContext::new(record.epoch)))
            }
            _ => Ok(()),
        }
    }
}
