//! Vote counting for one proposal attempt. No I/O.
//!
//! [`ProposerCore`] is fed acceptor responses by the async driver in
//! [`crate::proposer`] and answers with what the driver should do next.
//! Each acceptor counts once per phase; the first nack ends the attempt.

use std::collections::{BTreeMap, BTreeSet};

use super::quorum::majority;
use super::types::{AcceptResponse, PrepareResponse, ProposalId};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Stage {
    Prepare,
    Accept,
    Chosen,
    Superseded(ProposalId),
}

/// Promise and accept tally of a single proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposerCore<V, I: Ord> {
    proposal: ProposalId,
    quorum: usize,
    stage: Stage,
    /// Promising acceptors and what each had already accepted
    promises: BTreeMap<I, Option<(ProposalId, V)>>,
    accepts: BTreeSet<I>,
}

/// What a prepare response means for the attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreparePhaseResult<V> {
    Pending,
    /// A majority promised. `prior` is the newest value any of them had
    /// accepted; when present the slot is not ours to decide.
    Quorum { prior: Option<(ProposalId, V)> },
    Rejected { superseded_by: ProposalId },
}

/// What an accept response means for the attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptPhaseResult {
    Pending,
    /// A majority accepted: the value is chosen
    Learned,
    Rejected { superseded_by: ProposalId },
}

impl<V, I> ProposerCore<V, I>
where
    V: Clone,
    I: Ord + Clone,
{
    #[must_use]
    pub fn new(proposal: ProposalId, acceptors: usize) -> Self {
        Self {
            proposal,
            quorum: majority(acceptors),
            stage: Stage::Prepare,
            promises: BTreeMap::new(),
            accepts: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn proposal(&self) -> &ProposalId {
        &self.proposal
    }

    #[must_use]
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    #[must_use]
    pub fn is_learned(&self) -> bool {
        self.stage == Stage::Chosen
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.stage, Stage::Superseded(_))
    }

    fn supersede(&mut self, by: ProposalId) -> ProposalId {
        self.stage = Stage::Superseded(by.clone());
        by
    }

    /// Count a prepare response. Responses outside the prepare stage are
    /// ignored.
    pub fn handle_promise(&mut self, acceptor: I, response: PrepareResponse<V>) -> PreparePhaseResult<V> {
        if self.stage != Stage::Prepare {
            return PreparePhaseResult::Pending;
        }
        match response {
            PrepareResponse::Nack { promised } => PreparePhaseResult::Rejected {
                superseded_by: self.supersede(promised),
            },
            PrepareResponse::Promise { accepted } => {
                self.promises.insert(acceptor, accepted);
                if self.promises.len() < self.quorum {
                    return PreparePhaseResult::Pending;
                }
                self.stage = Stage::Accept;
                let prior = self
                    .promises
                    .values()
                    .flatten()
                    .max_by(|a, b| a.0.cmp(&b.0))
                    .cloned();
                PreparePhaseResult::Quorum { prior }
            }
        }
    }

    /// Count an accept response. Responses outside the accept stage are
    /// ignored.
    pub fn handle_accepted(&mut self, acceptor: I, response: AcceptResponse) -> AcceptPhaseResult {
        if self.stage != Stage::Accept {
            return AcceptPhaseResult::Pending;
        }
        match response {
            AcceptResponse::Rejected { promised } => AcceptPhaseResult::Rejected {
                superseded_by: self.supersede(promised),
            },
            AcceptResponse::Accepted => {
                self.accepts.insert(acceptor);
                if self.accepts.len() < self.quorum {
                    return AcceptPhaseResult::Pending;
                }
                self.stage = Stage::Chosen;
                AcceptPhaseResult::Learned
            }
        }
    }
}
