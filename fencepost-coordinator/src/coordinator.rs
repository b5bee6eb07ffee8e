//! Scope table of one coordinator node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fencepost_core::{Candidate, Clock, KvStore, Scope, SystemClock};
use fencepost_paxos::AcceptorClient;
use tracing::debug;

use crate::client::CoordinationClient;
use crate::config::CoordinatorConfig;
use crate::scope::ScopeHandle;

/// A coordinator node: the acceptor handles and store it talks to, and a
/// [`ScopeHandle`] per scope it has been asked to serve.
///
/// Scopes share nothing mutable with each other; each handle is created on
/// first use and kept for the life of the coordinator.
pub struct Coordinator<C, S, K = SystemClock> {
    config: CoordinatorConfig,
    acceptors: Vec<C>,
    store: S,
    clock: K,
    scopes: Mutex<HashMap<Scope, Arc<ScopeHandle<C, S, K>>>>,
}

impl<C, S> Coordinator<C, S, SystemClock>
where
    C: AcceptorClient<Scope, Candidate>,
    S: KvStore,
{
    pub fn new(config: CoordinatorConfig, acceptors: Vec<C>, store: S) -> Self {
        Self::with_clock(config, acceptors, store, SystemClock)
    }
}

impl<C, S, K> Coordinator<C, S, K>
where
    C: AcceptorClient<Scope, Candidate>,
    S: KvStore,
    K: Clock,
{
    pub fn with_clock(config: CoordinatorConfig, acceptors: Vec<C>, store: S, clock: K) -> Self {
        Self {
            config,
            acceptors,
            store,
            clock,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The handle for `scope`, created on first use.
    pub fn scope(&self, scope: &Scope) -> Arc<ScopeHandle<C, S, K>> {
        let mut scopes = self.scopes.lock().unwrap();
        scopes
            .entry(scope.clone())
            .or_insert_with(|| {
                debug!(%scope, node = %self.config.node_id, "creating scope handle");
                Arc::new(ScopeHandle::new(
                    scope.clone(),
                    self.acceptors.clone(),
                    self.store.clone(),
                    self.clock.clone(),
                    &self.config,
                ))
            })
            .clone()
    }

    /// Scopes this node has a handle for.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        let scopes = self.scopes.lock().unwrap();
        let mut list: Vec<Scope> = scopes.keys().cloned().collect();
        list.sort();
        list
    }

    /// A client facade bound to `scope`. Must be called inside a tokio
    /// runtime, which runs its unlock batcher.
    pub fn client(&self, scope: &Scope) -> CoordinationClient<C, S, K> {
        CoordinationClient::new(self.scope(scope), &self.config.batcher)
    }
}
