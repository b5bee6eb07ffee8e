//! Lock authority: lease-based mutual exclusion over named resources.
//!
//! Each resource has one record at `lease/{useCase}/{clientKey}/{resource}`
//! carrying the current lease (if any) and the epoch that wrote it. Grants
//! are compare-and-swap writes against the bytes read, so two writers can
//! never both install a lease over the same free resource. Writes are
//! fenced twice: the scope's fence record must not name a newer epoch, and
//! neither may the record being replaced.
//!
//! The fence is read again after a grant or refresh lands. If a newer epoch
//! claimed the scope in between, the write is undone and the caller gets
//! `LostLeadership`. Until the undo lands, a newer leader may see the lease
//! and refuse to grant over it, which is safe; it never sees both.
//!
//! Expiry is lazy. A lease is held while `now <= expires_at`; after that any
//! acquire treats the resource as free.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use error_stack::{Report, ResultExt};
use fencepost_core::records::{self, LeaseRecord, Stored, keys};
use fencepost_core::{
    Clock, Epoch, EpochContext, KvStore, Lease, Leadership, LockDescriptor, LockResponse,
    LockToken, OperationContext, Scope, ScopeContext,
};
use fencepost_paxos::config::BackoffConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::config::LockConfig;
use crate::error::CoordinationError;
use crate::fence::Fence;

#[derive(Debug, Default)]
struct LockState {
    /// Epoch the counter and the token index belong to
    epoch: Option<Epoch>,
    /// Last counter minted in `epoch`
    counter: u64,
    /// Resources of every token granted in `epoch` and not yet released
    held: HashMap<LockToken, BTreeSet<LockDescriptor>>,
}

impl LockState {
    fn enter(&mut self, epoch: Epoch) {
        if self.epoch != Some(epoch) {
            *self = LockState {
                epoch: Some(epoch),
                ..LockState::default()
            };
        }
    }
}

/// A lease record read for a resource, keyed for the following swap.
struct Observed {
    key: String,
    record: Option<Stored<LeaseRecord>>,
}

impl Observed {
    fn raw(&self) -> Option<&[u8]> {
        self.record.as_ref().map(|r| r.raw.as_slice())
    }

    fn live_lease(&self, now: u64) -> Option<&Lease> {
        self.record
            .as_ref()
            .and_then(|r| r.value.lease.as_ref())
            .filter(|lease| lease.is_live(now))
    }
}

pub struct LockAuthority<S, K> {
    scope: Scope,
    store: S,
    clock: K,
    fence: Fence<S>,
    retry: BackoffConfig,
    state: Mutex<LockState>,
}

impl<S: KvStore, K: Clock> LockAuthority<S, K> {
    pub fn new(scope: Scope, store: S, clock: K, config: &LockConfig) -> Self {
        Self {
            scope,
            fence: Fence::new(store.clone()),
            store,
            clock,
            retry: config.retry.clone(),
            state: Mutex::new(LockState::default()),
        }
    }

    fn lost(&self, newer: Epoch) -> Report<CoordinationError> {
        Report::new(CoordinationError::LOST_LEADERSHIP)
            .attach(ScopeContext::new(&self.scope))
            .attach(EpochContext::new(newer))
            .attach("lease record written by a newer epoch")
    }

    async fn observe(
        &self,
        leadership: &Leadership,
        resource: &LockDescriptor,
    ) -> Result<Observed, Report<CoordinationError>> {
        self.observe_key(leadership, keys::lease(&self.scope, resource))
            .await
    }

    /// Read a lease record, failing if a newer epoch wrote it.
    async fn observe_key(
        &self,
        leadership: &Leadership,
        key: String,
    ) -> Result<Observed, Report<CoordinationError>> {
        let record = records::read_record::<_, LeaseRecord>(&self.store, &key)
            .await
            .change_context(CoordinationError::STORE)?;
        if let Some(record) = &record
            && record.value.epoch > leadership.epoch
        {
            return Err(self.lost(record.value.epoch));
        }
        Ok(Observed { key, record })
    }

    async fn swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, Report<CoordinationError>> {
        self.store
            .compare_and_swap(key, expected, new)
            .await
            .change_context(CoordinationError::STORE)
    }

    /// Grant an exclusive lease over all of `resources`, or nothing.
    ///
    /// Without `acquire_timeout` a conflict returns
    /// [`LockResponse::Unsuccessful`] immediately; with one, attempts are
    /// retried with backoff until the deadline passes.
    ///
    /// # Errors
    /// `InvalidRequest` for an empty resource set or a lease shorter than a
    /// millisecond, `LostLeadership` when fenced out, `Store` on store errors.
    #[instrument(skip_all, fields(scope = %self.scope, epoch = %leadership.epoch))]
    pub async fn acquire(
        &self,
        leadership: &Leadership,
        resources: impl IntoIterator<Item = LockDescriptor>,
        lease_duration: Duration,
        acquire_timeout: Option<Duration>,
    ) -> Result<LockResponse, Report<CoordinationError>> {
        let resources: BTreeSet<LockDescriptor> = resources.into_iter().collect();
        if resources.is_empty() {
            return Err(Report::new(CoordinationError::INVALID_REQUEST)
                .attach("lock request names no resources"));
        }
        let duration_ms = u64::try_from(lease_duration.as_millis()).unwrap_or(u64::MAX);
        if duration_ms == 0 {
            return Err(Report::new(CoordinationError::INVALID_REQUEST)
                .attach("lease duration must be at least one millisecond"));
        }

        // A deadline past the end of time means no deadline
        let deadline = acquire_timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let waits = acquire_timeout.is_some();
        let mut attempt = 0;
        loop {
            let response = self
                .try_acquire(leadership, &resources, duration_ms)
                .await
                .attach(OperationContext::ACQUIRING_LOCK)?;
            if matches!(response, LockResponse::Successful { .. }) {
                return Ok(response);
            }

            if !waits {
                return Ok(response);
            }
            let mut delay = self.retry.delay(attempt, &mut rand::rng());
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(attempt, "acquire timed out");
                    return Ok(response);
                }
                delay = delay.min(deadline - now);
            }
            trace!(?delay, attempt, "resource busy, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn try_acquire(
        &self,
        leadership: &Leadership,
        resources: &BTreeSet<LockDescriptor>,
        duration_ms: u64,
    ) -> Result<LockResponse, Report<CoordinationError>> {
        let mut state = self.state.lock().await;
        state.enter(leadership.epoch);
        self.fence.check(&self.scope, leadership).await?;

        let now = self.clock.now_millis();
        let mut observed = Vec::with_capacity(resources.len());
        for resource in resources {
            let entry = self.observe(leadership, resource).await?;
            if let Some(lease) = entry.live_lease(now) {
                debug!(%resource, holder = %lease.holder, "resource is leased");
                return Ok(LockResponse::Unsuccessful);
            }
            if let Some(expired) = entry.record.as_ref().and_then(|r| r.value.lease.as_ref()) {
                state.held.remove(&expired.holder);
            }
            observed.push(entry);
        }

        state.counter += 1;
        let token = LockToken::new(leadership.epoch, state.counter);
        let lease = Lease {
            holder: token,
            resources: resources.clone(),
            expires_at: now.saturating_add(duration_ms),
            duration_ms,
        };
        let bytes = records::encode(&LeaseRecord {
            epoch: leadership.epoch,
            lease: Some(lease.clone()),
        })
        .change_context(CoordinationError::STORE)?;

        for (index, entry) in observed.iter().enumerate() {
            match self.swap(&entry.key, entry.raw(), &bytes).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(key = %entry.key, "lost race for resource");
                    self.roll_back(leadership, &observed[..index], &bytes).await;
                    self.observe_key(leadership, entry.key.clone()).await?;
                    return Ok(LockResponse::Unsuccessful);
                }
                Err(report) => {
                    self.roll_back(leadership, &observed[..index], &bytes).await;
                    return Err(report);
                }
            }
        }

        if let Err(report) = self.fence.check(&self.scope, leadership).await {
            warn!(%token, "fence moved during grant, withdrawing it");
            self.roll_back(leadership, &observed, &bytes).await;
            return Err(report);
        }

        debug!(%token, expires_at = lease.expires_at, "lease granted");
        state.held.insert(token, lease.resources.clone());
        Ok(LockResponse::Successful { token, lease })
    }

    /// Free resources already written by a grant that could not complete.
    async fn roll_back(&self, leadership: &Leadership, written: &[Observed], ours: &[u8]) {
        let Ok(tombstone) = records::encode(&LeaseRecord {
            epoch: leadership.epoch,
            lease: None,
        }) else {
            return;
        };
        for entry in written {
            self.put_back(&entry.key, ours, &tombstone).await;
        }
    }

    /// Replace `ours` with `previous` unless someone else wrote the key since.
    async fn put_back(&self, key: &str, ours: &[u8], previous: &[u8]) {
        match self.swap(key, Some(ours), previous).await {
            Ok(true) => trace!(%key, "lease write undone"),
            Ok(false) => debug!(%key, "lease rewritten before undo"),
            Err(report) => warn!(%key, ?report, "failed to undo lease write"),
        }
    }

    /// Extend the lease held by `token` by its original duration.
    ///
    /// Returns `false` if the token is from an older epoch, was released, or
    /// its lease already expired.
    ///
    /// # Errors
    /// `UnknownEpoch` for a token from an epoch newer than this leadership,
    /// `LostLeadership` when fenced out, `Store` on store errors.
    #[instrument(skip_all, fields(scope = %self.scope, epoch = %leadership.epoch, %token))]
    pub async fn refresh(
        &self,
        leadership: &Leadership,
        token: LockToken,
    ) -> Result<bool, Report<CoordinationError>> {
        if token.epoch > leadership.epoch {
            return Err(Report::new(CoordinationError::UNKNOWN_EPOCH)
                .attach(ScopeContext::new(&self.scope))
                .attach(EpochContext::new(token.epoch)));
        }

        let mut state = self.state.lock().await;
        state.enter(leadership.epoch);
        self.fence
            .check(&self.scope, leadership)
            .await
            .attach(OperationContext::REFRESHING_LOCK)?;

        if token.epoch < leadership.epoch {
            debug!("token from an earlier epoch");
            return Ok(false);
        }
        let Some(resources) = state.held.get(&token).cloned() else {
            debug!("token not held");
            return Ok(false);
        };

        let now = self.clock.now_millis();
        let mut observed = Vec::with_capacity(resources.len());
        let mut lease = None;
        for resource in &resources {
            let entry = self.observe(leadership, resource).await?;
            match entry.live_lease(now) {
                Some(current) if current.holder == token => lease = Some(current.clone()),
                _ => {
                    debug!(%resource, "lease expired or replaced");
                    state.held.remove(&token);
                    return Ok(false);
                }
            }
            observed.push(entry);
        }
        let Some(mut lease) = lease else {
            return Ok(false);
        };

        lease.expires_at = now.saturating_add(lease.duration_ms);
        let bytes = records::encode(&LeaseRecord {
            epoch: leadership.epoch,
            lease: Some(lease.clone()),
        })
        .change_context(CoordinationError::STORE)?;

        for entry in &observed {
            if !self.swap(&entry.key, entry.raw(), &bytes).await? {
                debug!(key = %entry.key, "lease changed during refresh");
                return Ok(false);
            }
        }

        if let Err(report) = self.fence.check(&self.scope, leadership).await {
            warn!("fence moved during refresh, restoring previous expiry");
            for entry in &observed {
                if let Some(previous) = entry.raw() {
                    self.put_back(&entry.key, &bytes, previous).await;
                }
            }
            return Err(report);
        }

        trace!(expires_at = lease.expires_at, "lease refreshed");
        Ok(true)
    }

    /// Release the leases of `tokens`. Idempotent: unknown, expired and
    /// already released tokens are skipped.
    ///
    /// A token stays known until every one of its resources is tombstoned,
    /// so a release that failed part way can be retried. Tombstones written
    /// by a deposed epoch are kept: they only free leases the holder gave up.
    ///
    /// # Errors
    /// `LostLeadership` when fenced out, `Store` on store errors.
    #[instrument(skip_all, fields(scope = %self.scope, epoch = %leadership.epoch, tokens = tokens.len()))]
    pub async fn release(
        &self,
        leadership: &Leadership,
        tokens: &[LockToken],
    ) -> Result<(), Report<CoordinationError>> {
        let mut state = self.state.lock().await;
        state.enter(leadership.epoch);
        self.fence
            .check(&self.scope, leadership)
            .await
            .attach(OperationContext::RELEASING_LOCK)?;

        let tombstone = records::encode(&LeaseRecord {
            epoch: leadership.epoch,
            lease: None,
        })
        .change_context(CoordinationError::STORE)?;

        for token in tokens {
            let Some(resources) = state.held.get(token).cloned() else {
                trace!(%token, "nothing to release");
                continue;
            };
            for resource in &resources {
                let entry = self.observe(leadership, resource).await?;
                let held_by_token = entry
                    .record
                    .as_ref()
                    .and_then(|r| r.value.lease.as_ref())
                    .is_some_and(|lease| lease.holder == *token);
                if held_by_token && !self.swap(&entry.key, entry.raw(), &tombstone).await? {
                    debug!(%token, %resource, "lease replaced before release");
                }
            }
            state.held.remove(token);
            debug!(%token, "released");
        }

        self.fence
            .check(&self.scope, leadership)
            .await
            .attach(OperationContext::RELEASING_LOCK)
    }

    /// The unexpired lease on `resource`, if any.
    ///
    /// # Errors
    /// Fails on store errors.
    pub async fn lease(
        &self,
        resource: &LockDescriptor,
    ) -> Result<Option<Lease>, Report<CoordinationError>> {
        let key = keys::lease(&self.scope, resource);
        let record = records::read_record::<_, LeaseRecord>(&self.store, &key)
            .await
            .change_context(CoordinationError::STORE)?;
        let now = self.clock.now_millis();
        Ok(record
            .and_then(|r| r.value.lease)
            .filter(|lease| lease.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use fencepost_core::{LeadershipId, ManualClock, MemoryKvStore, StoreError};

    use super::*;
    use crate::error::ErrorKind;

    /// Memory store whose lease writes can be made to fail, or to let a
    /// newer leader claim the fence right before they land.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemoryKvStore,
        fail_leases: Arc<AtomicBool>,
        claim_before_lease_write: Arc<std::sync::Mutex<Option<Leadership>>>,
    }

    impl KvStore for FlakyStore {
        async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
            self.inner.read(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            new: &[u8],
        ) -> Result<bool, Report<StoreError>> {
            if key.starts_with("lease/") {
                if self.fail_leases.load(Ordering::SeqCst) {
                    return Err(Report::new(StoreError).attach("lease writes are failing"));
                }
                let usurper = self.claim_before_lease_write.lock().unwrap().take();
                if let Some(usurper) = usurper {
                    let claimed = Fence::new(self.inner.clone())
                        .claim(&Scope::new("u", "c"), &usurper)
                        .await
                        .unwrap();
                    assert!(claimed);
                }
            }
            self.inner.compare_and_swap(key, expected, new).await
        }
    }

    const LEASE: Duration = Duration::from_secs(10);

    fn leadership(epoch: u64) -> Leadership {
        Leadership {
            epoch: Epoch(epoch),
            id: LeadershipId::random(),
        }
    }

    fn authority(store: &MemoryKvStore, clock: &ManualClock) -> LockAuthority<MemoryKvStore, ManualClock> {
        LockAuthority::new(
            Scope::new("u", "c"),
            store.clone(),
            clock.clone(),
            &LockConfig::default(),
        )
    }

    fn flaky_authority(store: &FlakyStore, clock: &ManualClock) -> LockAuthority<FlakyStore, ManualClock> {
        LockAuthority::new(
            Scope::new("u", "c"),
            store.clone(),
            clock.clone(),
            &LockConfig::default(),
        )
    }

    fn r(name: &str) -> LockDescriptor {
        LockDescriptor::new(name)
    }

    #[tokio::test]
    async fn test_conflicting_acquire_then_expiry() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(1_000);
        let locks = authority(&store, &clock);
        let leader = leadership(4);

        let first = locks.acquire(&leader, [r("r1")], LEASE, None).await.unwrap();
        assert_eq!(first.token(), Some(LockToken::new(Epoch(4), 1)));

        let second = locks.acquire(&leader, [r("r1")], LEASE, None).await.unwrap();
        assert_eq!(second, LockResponse::Unsuccessful);

        clock.advance(LEASE);
        let still_held = locks.acquire(&leader, [r("r1")], LEASE, None).await.unwrap();
        assert_eq!(still_held, LockResponse::Unsuccessful);

        clock.advance(Duration::from_millis(1));
        let third = locks.acquire(&leader, [r("r1")], LEASE, None).await.unwrap();
        assert_eq!(third.token(), Some(LockToken::new(Epoch(4), 2)));
    }

    #[tokio::test]
    async fn test_no_partial_locking() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        locks.acquire(&leader, [r("b")], LEASE, None).await.unwrap();
        let response = locks
            .acquire(&leader, [r("a"), r("b"), r("c")], LEASE, None)
            .await
            .unwrap();
        assert_eq!(response, LockResponse::Unsuccessful);
        assert_eq!(locks.lease(&r("a")).await.unwrap(), None);
        assert_eq!(locks.lease(&r("c")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_rejected() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        let err = locks
            .acquire(&leader, Vec::<LockDescriptor>::new(), LEASE, None)
            .await
            .unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::InvalidRequest);

        let err = locks
            .acquire(&leader, [r("a")], Duration::ZERO, None)
            .await
            .unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_refresh_extends_live_lease() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        let token = locks
            .acquire(&leader, [r("a")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        clock.advance(Duration::from_secs(8));
        assert!(locks.refresh(&leader, token).await.unwrap());

        clock.advance(Duration::from_secs(8));
        let lease = locks.lease(&r("a")).await.unwrap().unwrap();
        assert_eq!(lease.holder, token);
        assert_eq!(lease.expires_at, 18_000);
    }

    #[tokio::test]
    async fn test_refresh_after_expiry_fails_every_time() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        let token = locks
            .acquire(&leader, [r("a")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        clock.advance(LEASE + Duration::from_millis(1));
        assert!(!locks.refresh(&leader, token).await.unwrap());
        assert!(!locks.refresh(&leader, token).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_token_epochs() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(3);

        let older = LockToken::new(Epoch(2), 1);
        assert!(!locks.refresh(&leader, older).await.unwrap());

        let newer = LockToken::new(Epoch(9), 1);
        let err = locks.refresh(&leader, newer).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::UnknownEpoch);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        let token = locks
            .acquire(&leader, [r("a"), r("b")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        locks.release(&leader, &[token]).await.unwrap();
        locks.release(&leader, &[token]).await.unwrap();
        assert_eq!(locks.lease(&r("a")).await.unwrap(), None);
        assert_eq!(locks.lease(&r("b")).await.unwrap(), None);
        assert!(!locks.refresh(&leader, token).await.unwrap());

        let again = locks.acquire(&leader, [r("a")], LEASE, None).await.unwrap();
        assert_eq!(again.token(), Some(LockToken::new(Epoch(1), 2)));
    }

    #[tokio::test]
    async fn test_deposed_epoch_is_fenced() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let fence = Fence::new(store.clone());
        let scope = Scope::new("u", "c");

        let old = leadership(1);
        fence.claim(&scope, &old).await.unwrap();
        let old_locks = authority(&store, &clock);
        let token = old_locks
            .acquire(&old, [r("a")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        let new = leadership(2);
        fence.claim(&scope, &new).await.unwrap();
        let new_locks = authority(&store, &clock);

        // The new leader honours the lease granted before the takeover.
        let response = new_locks.acquire(&new, [r("a")], LEASE, None).await.unwrap();
        assert_eq!(response, LockResponse::Unsuccessful);

        let err = old_locks.acquire(&old, [r("b")], LEASE, None).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::LostLeadership);
        let err = old_locks.refresh(&old, token).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::LostLeadership);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_until_timeout() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        locks.acquire(&leader, [r("a")], LEASE, None).await.unwrap();

        let started = Instant::now();
        let response = locks
            .acquire(&leader, [r("a")], LEASE, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(response, LockResponse::Unsuccessful);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failed_release_can_be_retried() {
        let store = FlakyStore::default();
        let clock = ManualClock::starting_at(0);
        let locks = flaky_authority(&store, &clock);
        let leader = leadership(1);

        let token = locks
            .acquire(&leader, [r("a")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        store.fail_leases.store(true, Ordering::SeqCst);
        let err = locks.release(&leader, &[token]).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::Store);

        store.fail_leases.store(false, Ordering::SeqCst);
        assert_eq!(locks.lease(&r("a")).await.unwrap().map(|l| l.holder), Some(token));
        assert!(locks.refresh(&leader, token).await.unwrap());

        locks.release(&leader, &[token]).await.unwrap();
        assert_eq!(locks.lease(&r("a")).await.unwrap(), None);
        assert!(!locks.refresh(&leader, token).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_is_withdrawn_when_fence_moves_mid_write() {
        let store = FlakyStore::default();
        let clock = ManualClock::starting_at(0);
        let scope = Scope::new("u", "c");
        let fence = Fence::new(store.inner.clone());

        let old = leadership(1);
        fence.claim(&scope, &old).await.unwrap();
        let old_locks = flaky_authority(&store, &clock);

        let new = leadership(2);
        *store.claim_before_lease_write.lock().unwrap() = Some(new);
        let err = old_locks.acquire(&old, [r("a")], LEASE, None).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::LostLeadership);
        assert_eq!(old_locks.lease(&r("a")).await.unwrap(), None);

        let new_locks = flaky_authority(&store, &clock);
        let granted = new_locks.acquire(&new, [r("a")], LEASE, None).await.unwrap();
        assert_eq!(granted.token(), Some(LockToken::new(Epoch(2), 1)));
    }

    #[tokio::test]
    async fn test_refresh_is_undone_when_fence_moves_mid_write() {
        let store = FlakyStore::default();
        let clock = ManualClock::starting_at(0);
        let scope = Scope::new("u", "c");

        let old = leadership(1);
        Fence::new(store.inner.clone()).claim(&scope, &old).await.unwrap();
        let locks = flaky_authority(&store, &clock);
        let token = locks
            .acquire(&old, [r("a")], LEASE, None)
            .await
            .unwrap()
            .token()
            .unwrap();

        clock.advance(Duration::from_secs(5));
        *store.claim_before_lease_write.lock().unwrap() = Some(leadership(2));
        let err = locks.refresh(&old, token).await.unwrap_err();
        assert_eq!(err.current_context().kind(), ErrorKind::LostLeadership);

        let lease = locks.lease(&r("a")).await.unwrap().unwrap();
        assert_eq!(lease.holder, token);
        assert_eq!(lease.expires_at, 10_000);
    }

    #[tokio::test]
    async fn test_unbounded_acquire_timeout_is_accepted() {
        let store = MemoryKvStore::new();
        let clock = ManualClock::starting_at(0);
        let locks = authority(&store, &clock);
        let leader = leadership(1);

        let response = locks
            .acquire(&leader, [r("a")], LEASE, Some(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(response.token(), Some(LockToken::new(Epoch(1), 1)));
    }
}
