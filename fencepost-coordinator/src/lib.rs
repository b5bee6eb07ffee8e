//! Fencepost coordinator
//!
//! Runs the leader side of a scope: Paxos leader election over a set of
//! acceptors, then the fenced services a leader provides. Those are a
//! monotonic timestamp oracle and a lease-based lock authority, both
//! persisted into an external [`KvStore`](fencepost_core::KvStore) and
//! guarded by the epoch fence so a deposed leader cannot overwrite its
//! successor.
//!
//! [`CoordinationClient`] is the facade applications use.

#![warn(clippy::pedantic)]

mod batcher;
mod client;
pub mod config;
mod coordinator;
mod election;
pub mod error;
mod fence;
mod lock;
mod oracle;
mod scope;
mod tcp;

pub use batcher::{ReleaseSink, UnlockBatcher};
pub use client::CoordinationClient;
pub use config::{BatcherConfig, CoordinatorConfig, ElectionConfig, LockConfig, OracleConfig};
pub use coordinator::Coordinator;
pub use election::{Election, ElectionOutcome, UnsuccessfulReason};
pub use error::{CoordinationError, ErrorKind};
pub use fence::Fence;
pub use lock::LockAuthority;
pub use oracle::TimestampOracle;
pub use scope::ScopeHandle;
pub use tcp::TcpAcceptorClient;
