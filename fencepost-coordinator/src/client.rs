//! Client facade combining timestamps and locks for one scope.

use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use fencepost_core::{
    Candidate, Clock, KvStore, Lease, LockDescriptor, LockResponse, LockToken, Scope,
    ScopeContext, TimestampBlock,
};
use fencepost_paxos::AcceptorClient;
use tracing::{debug, instrument};

use crate::batcher::UnlockBatcher;
use crate::config::BatcherConfig;
use crate::error::{CoordinationError, ErrorKind};
use crate::scope::ScopeHandle;

/// The external API of a scope.
///
/// Operations elect this node when it does not lead the scope. Timestamp
/// requests that find the node fenced out re-elect once and retry; lock
/// requests surface the failure so the caller re-issues them fresh.
pub struct CoordinationClient<C, S, K> {
    handle: Arc<ScopeHandle<C, S, K>>,
    batcher: UnlockBatcher,
}

impl<C, S, K> CoordinationClient<C, S, K>
where
    C: AcceptorClient<Scope, Candidate>,
    S: KvStore,
    K: Clock,
{
    pub fn new(handle: Arc<ScopeHandle<C, S, K>>, config: &BatcherConfig) -> Self {
        let batcher = UnlockBatcher::spawn(handle.clone(), config);
        Self { handle, batcher }
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        self.handle.scope()
    }

    #[must_use]
    pub fn handle(&self) -> &Arc<ScopeHandle<C, S, K>> {
        &self.handle
    }

    async fn ensure_leader(&self) -> Result<(), Report<CoordinationError>> {
        if self.handle.leader_state().is_leader() {
            return Ok(());
        }
        if self.handle.elect().await?.is_leader() {
            Ok(())
        } else {
            Err(Report::new(CoordinationError::NOT_LEADER)
                .attach(ScopeContext::new(self.handle.scope()))
                .attach("another node leads this scope"))
        }
    }

    /// A single timestamp, strictly greater than any handed out before.
    ///
    /// # Errors
    /// See [`get_timestamps`](Self::get_timestamps).
    pub async fn get_fresh_timestamp(&self) -> Result<u64, Report<CoordinationError>> {
        Ok(self.get_timestamps(1).await?.lower)
    }

    /// # Errors
    /// `InvalidRequest` for a zero count, `NotLeader` if another node leads
    /// the scope, `QuorumUnavailable` if no election could run.
    #[instrument(skip_all, fields(scope = %self.handle.scope(), count))]
    pub async fn get_timestamps(&self, count: u64) -> Result<TimestampBlock, Report<CoordinationError>> {
        self.ensure_leader().await?;
        match self.handle.get_timestamps(count).await {
            Err(report) if report.current_context().kind() == ErrorKind::LostLeadership => {
                debug!("fenced out, re-electing once");
                self.ensure_leader().await?;
                self.handle.get_timestamps(count).await
            }
            other => other,
        }
    }

    /// Lock `resources` for `lease_duration` without waiting.
    ///
    /// # Errors
    /// See [`lock_with_timeout`](Self::lock_with_timeout).
    pub async fn lock(
        &self,
        resources: impl IntoIterator<Item = LockDescriptor>,
        lease_duration: Duration,
    ) -> Result<LockResponse, Report<CoordinationError>> {
        self.lock_with_timeout(resources, lease_duration, None).await
    }

    /// # Errors
    /// `InvalidRequest`, `NotLeader`, `LostLeadership`, `QuorumUnavailable`
    /// or `Store`. Contention is `Ok(LockResponse::Unsuccessful)`.
    #[instrument(skip_all, fields(scope = %self.handle.scope()))]
    pub async fn lock_with_timeout(
        &self,
        resources: impl IntoIterator<Item = LockDescriptor>,
        lease_duration: Duration,
        acquire_timeout: Option<Duration>,
    ) -> Result<LockResponse, Report<CoordinationError>> {
        self.ensure_leader().await?;
        self.handle
            .acquire(resources, lease_duration, acquire_timeout)
            .await
    }

    /// Extend the lease of `token`. `false` when this node no longer leads
    /// the scope or the lease is gone.
    ///
    /// # Errors
    /// `UnknownEpoch`, `LostLeadership` or `Store`.
    pub async fn refresh(&self, token: LockToken) -> Result<bool, Report<CoordinationError>> {
        if !self.handle.leader_state().is_leader() {
            debug!(%token, "not leading, refresh cannot succeed");
            return Ok(false);
        }
        self.handle.refresh(token).await
    }

    /// Release `tokens` in the background. Never blocks and never fails.
    pub fn unlock(&self, tokens: impl IntoIterator<Item = LockToken>) {
        self.batcher.enqueue(tokens.into_iter().collect());
    }

    /// # Errors
    /// Fails on store errors.
    pub async fn lease(&self, resource: &LockDescriptor) -> Result<Option<Lease>, Report<CoordinationError>> {
        self.handle.lease(resource).await
    }

    /// Flush pending unlocks and stop the batcher.
    pub async fn close(self) {
        self.batcher.close().await;
    }
}
