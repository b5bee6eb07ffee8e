//! Per-scope leader role: election state plus the privileged services that
//! only a leader may run.

use std::sync::RwLock;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use fencepost_core::{
    Candidate, Clock, KvStore, LeaderState, Lease, Leadership, LockDescriptor, LockResponse,
    LockToken, OperationContext, Scope, ScopeContext, TimestampBlock,
};
use fencepost_paxos::AcceptorClient;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::batcher::ReleaseSink;
use crate::config::CoordinatorConfig;
use crate::election::{Election, ElectionOutcome, UnsuccessfulReason};
use crate::error::{CoordinationError, ErrorKind};
use crate::fence::Fence;
use crate::lock::LockAuthority;
use crate::oracle::TimestampOracle;

/// Everything this node runs for one scope.
///
/// Privileged operations read the current [`LeaderState`], fail with
/// `NotLeader` when it is not `Leader`, and pass the leadership snapshot to
/// the fenced service. Any `LostLeadership` failure drops the role so the
/// scope stops serving until the next election.
pub struct ScopeHandle<C, S, K> {
    scope: Scope,
    election: Mutex<Election<C>>,
    leader: RwLock<LeaderState>,
    fence: Fence<S>,
    oracle: TimestampOracle<S>,
    locks: LockAuthority<S, K>,
}

impl<C, S, K> ScopeHandle<C, S, K>
where
    C: AcceptorClient<Scope, Candidate>,
    S: KvStore,
    K: Clock,
{
    pub fn new(scope: Scope, acceptors: Vec<C>, store: S, clock: K, config: &CoordinatorConfig) -> Self {
        Self {
            election: Mutex::new(Election::new(
                scope.clone(),
                config.node_id.clone(),
                acceptors,
                &config.election,
            )),
            leader: RwLock::new(LeaderState::NotLeader),
            fence: Fence::new(store.clone()),
            oracle: TimestampOracle::new(scope.clone(), store.clone(), &config.oracle),
            locks: LockAuthority::new(scope.clone(), store, clock, &config.lock),
            scope,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn leader_state(&self) -> LeaderState {
        *self.leader.read().unwrap()
    }

    /// Give up the leader role locally. Acceptor and store state are untouched.
    pub fn step_down(&self) {
        let mut leader = self.leader.write().unwrap();
        if let LeaderState::Leader(leadership) = *leader {
            info!(scope = %self.scope, epoch = %leadership.epoch, "stepping down");
        }
        *leader = LeaderState::NotLeader;
    }

    fn set_leader(&self, state: LeaderState) {
        *self.leader.write().unwrap() = state;
    }

    fn leadership(&self) -> Result<Leadership, Report<CoordinationError>> {
        self.leader_state().leadership().ok_or_else(|| {
            Report::new(CoordinationError::NOT_LEADER).attach(ScopeContext::new(&self.scope))
        })
    }

    /// Step down if `result` shows a newer epoch took the scope.
    fn observe<T>(
        &self,
        leadership: &Leadership,
        result: Result<T, Report<CoordinationError>>,
    ) -> Result<T, Report<CoordinationError>> {
        if let Err(report) = &result
            && report.current_context().kind() == ErrorKind::LostLeadership
        {
            warn!(scope = %self.scope, epoch = %leadership.epoch, "fenced out by a newer leader");
            let mut leader = self.leader.write().unwrap();
            if *leader == LeaderState::Leader(*leadership) {
                *leader = LeaderState::NotLeader;
            }
        }
        result
    }

    /// Run an election for the scope and, on a win, claim the fence and seed
    /// the oracle before serving.
    ///
    /// Callers that queued behind a winning election get its leadership
    /// instead of deposing it with another round.
    ///
    /// # Errors
    /// `QuorumUnavailable` when no majority of acceptors answered, `Store`
    /// when claiming fails on the store.
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn elect(&self) -> Result<LeaderState, Report<CoordinationError>> {
        let mut election = self.election.lock().await;
        if let current @ LeaderState::Leader(leadership) = self.leader_state() {
            debug!(epoch = %leadership.epoch, "already leading");
            return Ok(current);
        }

        let leadership = match election.try_become_leader().await {
            ElectionOutcome::Won(leadership) => leadership,
            ElectionOutcome::Unsuccessful(UnsuccessfulReason::NoQuorum) => {
                self.step_down();
                return Err(Report::new(CoordinationError::QUORUM_UNAVAILABLE)
                    .attach(ScopeContext::new(&self.scope))
                    .attach(OperationContext::ELECTING));
            }
            ElectionOutcome::Unsuccessful(reason) => {
                info!(?reason, "election unsuccessful");
                self.step_down();
                return Ok(LeaderState::NotLeader);
            }
        };

        let claimed = self
            .fence
            .claim(&self.scope, &leadership)
            .await
            .attach(OperationContext::ELECTING)?;
        if !claimed {
            info!(epoch = %leadership.epoch, "won a stale epoch");
            self.step_down();
            return Ok(LeaderState::NotLeader);
        }

        match self.oracle.seed(&leadership).await {
            Ok(()) => {}
            Err(report) if report.current_context().kind() == ErrorKind::LostLeadership => {
                info!(epoch = %leadership.epoch, "deposed while seeding");
                self.step_down();
                return Ok(LeaderState::NotLeader);
            }
            Err(report) => return Err(report),
        }

        let state = LeaderState::Leader(leadership);
        self.set_leader(state);
        info!(epoch = %leadership.epoch, leadership = %leadership.id, "serving as leader");
        Ok(state)
    }

    /// # Errors
    /// `NotLeader`, `LostLeadership`, `InvalidRequest` or `Store`.
    pub async fn get_timestamps(&self, count: u64) -> Result<TimestampBlock, Report<CoordinationError>> {
        let leadership = self.leadership()?;
        let result = self.oracle.allocate(&leadership, count).await;
        self.observe(&leadership, result)
    }

    /// # Errors
    /// `NotLeader`, `LostLeadership`, `InvalidRequest` or `Store`.
    pub async fn acquire(
        &self,
        resources: impl IntoIterator<Item = LockDescriptor>,
        lease_duration: Duration,
        acquire_timeout: Option<Duration>,
    ) -> Result<LockResponse, Report<CoordinationError>> {
        let leadership = self.leadership()?;
        let result = self
            .locks
            .acquire(&leadership, resources, lease_duration, acquire_timeout)
            .await;
        self.observe(&leadership, result)
    }

    /// # Errors
    /// `NotLeader`, `LostLeadership`, `UnknownEpoch` or `Store`.
    pub async fn refresh(&self, token: LockToken) -> Result<bool, Report<CoordinationError>> {
        let leadership = self.leadership()?;
        let result = self.locks.refresh(&leadership, token).await;
        self.observe(&leadership, result)
    }

    /// # Errors
    /// `NotLeader`, `LostLeadership` or `Store`.
    pub async fn release(&self, tokens: &[LockToken]) -> Result<(), Report<CoordinationError>> {
        let leadership = self.leadership()?;
        let result = self.locks.release(&leadership, tokens).await;
        self.observe(&leadership, result)
    }

    /// The unexpired lease on `resource`. Readable without leadership.
    ///
    /// # Errors
    /// Fails on store errors.
    pub async fn lease(&self, resource: &LockDescriptor) -> Result<Option<Lease>, Report<CoordinationError>> {
        self.locks.lease(resource).await
    }
}

impl<C, S, K> ReleaseSink for ScopeHandle<C, S, K>
where
    C: AcceptorClient<Scope, Candidate>,
    S: KvStore,
    K: Clock,
{
    async fn release_batch(&self, tokens: Vec<LockToken>) -> Result<(), Report<CoordinationError>> {
        self.release(&tokens).await
    }
}
