//! Proposer runtime implementation
//!
//! [`Proposer`] drives two-phase Paxos for one scope against a fixed set of
//! acceptor client handles. Each call to [`Proposer::propose`] targets the
//! next free sequence of the scope.
//!
//! # Example
//!
//! ```ignore
//! use fencepost_paxos::config::ProposerConfig;
//! use fencepost_paxos::proposer::{ProposeOutcome, Proposer};
//!
//! let mut proposer = Proposer::new(scope, "node-a", acceptors, ProposerConfig::default());
//! match proposer.propose(value).await {
//!     ProposeOutcome::Chosen { seq, .. } => println!("won slot {seq}"),
//!     other => println!("lost: {other:?}"),
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rand::Rng;
use rand::rngs::StdRng;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, trace};

use crate::config::{BackoffConfig, ProposerConfig, Sleep};
use crate::core::{
    AcceptPhaseResult, PreparePhaseResult, ProposalId, ProposerCore, Sequence, majority,
};
use crate::traits::{AcceptorClient, ScopeKey};

/// Final result of [`Proposer::propose`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposeOutcome<V> {
    /// Our value was chosen for `seq` by a majority
    Chosen { seq: Sequence, proposal: ProposalId },
    /// A majority reported an earlier accepted value for `seq`; the slot is
    /// not ours to decide
    Preempted {
        seq: Sequence,
        accepted: (ProposalId, V),
    },
    /// Fewer than a majority answered within the phase timeout
    NoQuorum,
    /// Superseded by higher proposals on every attempt
    Contended,
}

/// Result of a single proposal attempt
enum AttemptResult<V> {
    Chosen,
    Preempted((ProposalId, V)),
    Superseded(ProposalId),
    NoQuorum,
}

/// Drives Paxos rounds for one scope.
///
/// The round counter persists across calls and only moves forward, so a
/// proposal id is never reused for the same sequence.
pub struct Proposer<K, V, C, S: Sleep, R: Rng = StdRng> {
    scope: K,
    identity: String,
    acceptors: Vec<C>,
    round: u64,
    backoff: BackoffConfig,
    phase_timeout: Duration,
    max_attempts: u32,
    sleep: S,
    rng: R,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V, C, S, R> Proposer<K, V, C, S, R>
where
    K: ScopeKey,
    V: Clone + fmt::Debug + Send + Sync + 'static,
    C: AcceptorClient<K, V>,
    S: Sleep,
    R: Rng,
{
    #[must_use]
    pub fn new(
        scope: K,
        identity: impl Into<String>,
        acceptors: Vec<C>,
        config: ProposerConfig<S, R>,
    ) -> Self {
        let identity = identity.into();
        debug!(?scope, %identity, acceptors = acceptors.len(), "creating proposer");
        Self {
            scope,
            identity,
            acceptors,
            round: 0,
            backoff: config.backoff,
            phase_timeout: config.phase_timeout,
            max_attempts: config.max_attempts,
            sleep: config.sleep,
            rng: config.rng,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &K {
        &self.scope
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Highest round used or observed so far.
    #[must_use]
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Fast-forward the round counter past a competing proposal.
    pub fn observe(&mut self, competing: &ProposalId) {
        self.round = self.round.max(competing.round);
    }

    fn quorum(&self) -> usize {
        majority(self.acceptors.len())
    }

    /// Propose `value` for the next free sequence of the scope.
    ///
    /// # Cancellation Safety
    ///
    /// Cancelling mid-proposal discards in-flight protocol state. The round
    /// counter is preserved, so a later call still uses fresh proposal ids.
    #[instrument(skip_all, name = "propose", fields(scope = ?self.scope, identity = %self.identity))]
    pub async fn propose(&mut self, value: V) -> ProposeOutcome<V> {
        for attempt in 0..self.max_attempts {
            let Some(seq) = self.next_sequence().await else {
                debug!("no quorum for sequence discovery");
                return ProposeOutcome::NoQuorum;
            };

            self.round += 1;
            let proposal = ProposalId::new(self.round, self.identity.clone());
            debug!(seq, %proposal, attempt, "attempting proposal");

            match self.run_attempt(seq, &proposal, &value).await {
                AttemptResult::Chosen => {
                    debug!(seq, %proposal, "proposal chosen");
                    return ProposeOutcome::Chosen { seq, proposal };
                }
                AttemptResult::Preempted(accepted) => {
                    debug!(seq, holder = %accepted.0, "slot already carries a value");
                    return ProposeOutcome::Preempted { seq, accepted };
                }
                AttemptResult::NoQuorum => {
                    debug!(seq, "no quorum within phase timeout");
                    return ProposeOutcome::NoQuorum;
                }
                AttemptResult::Superseded(by) => {
                    debug!(seq, superseded_by = %by, "proposal superseded, will retry");
                    self.observe(&by);
                }
            }

            let backoff = self.backoff.delay(attempt, &mut self.rng);
            trace!(?backoff, "backing off before retry");
            self.sleep.sleep(backoff).await;
        }

        ProposeOutcome::Contended
    }

    /// One past the highest sequence any member of a majority has accepted.
    ///
    /// A chosen value is held by a majority, and any two majorities intersect,
    /// so this never lands on an already decided slot.
    async fn next_sequence(&self) -> Option<Sequence> {
        let scope = &self.scope;
        let deadline = Instant::now() + self.phase_timeout;
        let mut pending: FuturesUnordered<_> = self
            .acceptors
            .iter()
            .map(|acceptor| async move { (acceptor.id(), acceptor.latest_sequence(scope).await) })
            .collect();

        let mut answered = 0;
        let mut highest: Option<Sequence> = None;
        while answered < self.quorum() {
            match timeout_at(deadline, pending.next()).await {
                Ok(Some((_, Ok(seq)))) => {
                    answered += 1;
                    highest = highest.max(seq);
                }
                Ok(Some((acceptor, Err(error)))) => {
                    debug!(acceptor, ?error, "latest sequence query failed");
                }
                Ok(None) | Err(_) => return None,
            }
        }

        Some(highest.map_or(1, |seq| seq + 1))
    }

    async fn run_attempt(&self, seq: Sequence, proposal: &ProposalId, value: &V) -> AttemptResult<V> {
        let scope = &self.scope;
        let mut tally: ProposerCore<V, String> =
            ProposerCore::new(proposal.clone(), self.acceptors.len());

        // Phase 1
        let deadline = Instant::now() + self.phase_timeout;
        let mut prepares: FuturesUnordered<_> = self
            .acceptors
            .iter()
            .map(|acceptor| async move {
                (acceptor.id(), acceptor.prepare(scope, seq, proposal).await)
            })
            .collect();

        loop {
            match timeout_at(deadline, prepares.next()).await {
                Ok(Some((acceptor, Ok(response)))) => {
                    trace!(acceptor, ?response, "prepare response");
                    match tally.handle_promise(acceptor.to_owned(), response) {
                        PreparePhaseResult::Pending => {}
                        PreparePhaseResult::Quorum { prior: Some(accepted) } => {
                            return AttemptResult::Preempted(accepted);
                        }
                        PreparePhaseResult::Quorum { prior: None } => break,
                        PreparePhaseResult::Rejected { superseded_by } => {
                            return AttemptResult::Superseded(superseded_by);
                        }
                    }
                }
                Ok(Some((acceptor, Err(error)))) => {
                    debug!(acceptor, ?error, "prepare failed");
                }
                Ok(None) | Err(_) => return AttemptResult::NoQuorum,
            }
        }
        drop(prepares);

        // Phase 2
        let deadline = Instant::now() + self.phase_timeout;
        let mut accepts: FuturesUnordered<_> = self
            .acceptors
            .iter()
            .map(|acceptor| async move {
                (acceptor.id(), acceptor.accept(scope, seq, proposal, value).await)
            })
            .collect();

        loop {
            match timeout_at(deadline, accepts.next()).await {
                Ok(Some((acceptor, Ok(response)))) => {
                    trace!(acceptor, ?response, "accept response");
                    match tally.handle_accepted(acceptor.to_owned(), response) {
                        AcceptPhaseResult::Pending => {}
                        AcceptPhaseResult::Learned => return AttemptResult::Chosen,
                        AcceptPhaseResult::Rejected { superseded_by } => {
                            return AttemptResult::Superseded(superseded_by);
                        }
                    }
                }
                Ok(Some((acceptor, Err(error)))) => {
                    debug!(acceptor, ?error, "accept failed");
                }
                Ok(None) | Err(_) => return AttemptResult::NoQuorum,
            }
        }
    }
}
