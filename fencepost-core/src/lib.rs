//! Fencepost core: types shared by acceptor nodes and coordinators
//!
//! Holds the domain model (scopes, epochs, lock tokens, leases), the
//! external key-value store contract, the record layout inside that store,
//! and the acceptor wire protocol.

#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod records;
pub mod store;
mod types;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConnectorError, EpochContext, KeyContext, OperationContext, ScopeContext, StoreError,
};
pub use store::{KvStore, MemoryKvStore};
pub use types::{
    Candidate, Epoch, LeaderState, Leadership, LeadershipId, Lease, LockDescriptor, LockResponse,
    LockToken, Scope, TimestampBlock,
};
