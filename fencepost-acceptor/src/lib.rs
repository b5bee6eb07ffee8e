//! Fencepost acceptor node
//!
//! Serves the Paxos acceptor role over TCP, persisting slot state into a
//! [`KvStore`](fencepost_core::KvStore): fjall on disk, or memory for tests.

#![warn(clippy::pedantic)]

mod fjall_store;
mod server;
mod state_store;

pub use fjall_store::FjallKvStore;
pub use server::{KvAcceptorHandler, dispatch, serve};
pub use state_store::KvAcceptorStore;
