//! Acceptor RPC messages and their framing

mod codec;

use fencepost_paxos::{AcceptResponse, PrepareResponse, ProposalId, Sequence};
use serde::{Deserialize, Serialize};

pub use codec::{DEFAULT_MAX_FRAME, PostcardCodec};

use crate::{Candidate, Scope};

/// Request sent from a coordinator to an acceptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptorRequest {
    Prepare {
        scope: Scope,
        seq: Sequence,
        proposal: ProposalId,
    },
    Accept {
        scope: Scope,
        seq: Sequence,
        proposal: ProposalId,
        value: Candidate,
    },
    LatestSequence {
        scope: Scope,
    },
}

/// Acceptor reply, one per request, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptorResponse {
    Prepare(PrepareResponse<Candidate>),
    Accept(AcceptResponse),
    LatestSequence(Option<Sequence>),
    /// The acceptor failed to serve the request (e.g. store failure)
    Failed(String),
}
