//! Leadership election over the scope's Paxos log.
//!
//! Each win decides the next sequence of the scope; that sequence is the new
//! epoch. Losing, contention and missing quorum all surface as
//! [`ElectionOutcome::Unsuccessful`].

use fencepost_core::{Candidate, Epoch, Leadership, LeadershipId, Scope};
use fencepost_paxos::config::TokioSleep;
use fencepost_paxos::{AcceptorClient, ProposeOutcome, Proposer};
use tracing::{debug, info, instrument};

use crate::config::ElectionConfig;

/// Result of [`Election::try_become_leader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Won(Leadership),
    Unsuccessful(UnsuccessfulReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsuccessfulReason {
    /// Another candidate already holds the slot we tried
    SlotTaken { holder: Candidate },
    /// Fewer than a majority of acceptors answered in time
    NoQuorum,
    /// Kept losing to higher proposals
    Contended,
}

/// Per-scope election driver. Owns the proposer so its round counter
/// survives across elections.
pub struct Election<C> {
    node: String,
    proposer: Proposer<Scope, Candidate, C, TokioSleep>,
}

impl<C> Election<C>
where
    C: AcceptorClient<Scope, Candidate>,
{
    pub fn new(scope: Scope, node: impl Into<String>, acceptors: Vec<C>, config: &ElectionConfig) -> Self {
        let node = node.into();
        let proposer = Proposer::new(scope, node.clone(), acceptors, config.proposer_config());
        Self { node, proposer }
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        self.proposer.scope()
    }

    /// Run one election for the next free sequence of the scope.
    #[instrument(skip_all, name = "election", fields(scope = %self.proposer.scope(), node = %self.node))]
    pub async fn try_become_leader(&mut self) -> ElectionOutcome {
        let candidate = Candidate {
            node: self.node.clone(),
            leadership: LeadershipId::random(),
        };

        match self.proposer.propose(candidate.clone()).await {
            ProposeOutcome::Chosen { seq, proposal } => {
                let leadership = Leadership {
                    epoch: Epoch(seq),
                    id: candidate.leadership,
                };
                info!(epoch = seq, %proposal, leadership = %leadership.id, "won leadership");
                ElectionOutcome::Won(leadership)
            }
            ProposeOutcome::Preempted { seq, accepted: (proposal, holder) } => {
                debug!(seq, %proposal, holder = %holder.node, "slot already taken");
                ElectionOutcome::Unsuccessful(UnsuccessfulReason::SlotTaken { holder })
            }
            ProposeOutcome::NoQuorum => {
                debug!("no quorum");
                ElectionOutcome::Unsuccessful(UnsuccessfulReason::NoQuorum)
            }
            ProposeOutcome::Contended => {
                debug!("gave up after contention");
                ElectionOutcome::Unsuccessful(UnsuccessfulReason::Contended)
            }
        }
    }
}
