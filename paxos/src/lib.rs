//! Single-decree Paxos over per-scope sequence logs
//!
//! Each scope key (for example a use-case/client-key pair) owns an
//! independent log of numbered slots. A value is chosen for a slot once a
//! majority of acceptors accepted it under the same proposal id.
//!
//! # Architecture
//!
//! - **Core**: pure state machines ([`core::AcceptorCore`], [`core::ProposerCore`])
//! - **Acceptors**: [`acceptor::AcceptorHandler`] persists promises and
//!   accepted values through an [`AcceptorStateStore`]
//! - **Proposers**: [`proposer::Proposer`] drives both phases against a set
//!   of [`AcceptorClient`] handles with timeouts and jittered backoff
//!
//! # Quick Start
//!
//! ```ignore
//! use fencepost_paxos::acceptor::{AcceptorHandler, LocalAcceptor, MemoryAcceptorState};
//! use fencepost_paxos::config::ProposerConfig;
//! use fencepost_paxos::proposer::Proposer;
//!
//! let acceptors: Vec<_> = (0..3)
//!     .map(|i| LocalAcceptor::new(format!("a{i}"), AcceptorHandler::new(MemoryAcceptorState::new())))
//!     .collect();
//! let mut proposer = Proposer::new("scope", "node-a", acceptors, ProposerConfig::default());
//! let outcome = proposer.propose("value").await;
//! ```

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod config;
pub mod core;
pub mod proposer;
mod traits;

pub use crate::core::{AcceptResponse, PrepareResponse, ProposalId, Sequence, SlotState};
pub use proposer::{ProposeOutcome, Proposer};
pub use traits::{AcceptorClient, AcceptorStateStore, ScopeKey};
