//! Fencepost testing: in-process cluster fixtures
//!
//! A [`TestCluster`] owns N acceptors, each persisting into its own
//! [`MemoryKvStore`], one shared external store for fence, timestamp and
//! lease records, and a [`ManualClock`]. Every [`TestNode`] gets its own
//! links to the acceptors, so partitions can be drawn per node.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use error_stack::{Report, ResultExt};
use fencepost_acceptor::{KvAcceptorHandler, KvAcceptorStore};
use fencepost_coordinator::{
    BatcherConfig, CoordinationClient, Coordinator, CoordinatorConfig, ElectionConfig,
};
use fencepost_core::{Candidate, ManualClock, MemoryKvStore, Scope};
use fencepost_paxos::acceptor::{AcceptorHandler, LocalAcceptor};
use fencepost_paxos::config::BackoffConfig;
use fencepost_paxos::{AcceptResponse, AcceptorClient, PrepareResponse, ProposalId, Sequence};
use tracing::Dispatch;
use tracing::dispatcher::DefaultGuard;

/// Clock reading every cluster starts at
pub const START_MILLIS: u64 = 1_000_000;

pub type MemoryAcceptor = LocalAcceptor<Scope, Candidate, KvAcceptorStore<MemoryKvStore>>;
pub type TestCoordinator = Coordinator<LinkedAcceptor, MemoryKvStore, ManualClock>;
pub type TestClient = CoordinationClient<LinkedAcceptor, MemoryKvStore, ManualClock>;

/// Install a test-writer subscriber for the current thread. Uses
/// `RUST_LOG`, defaulting to debug output for the fencepost crates. Logging
/// stops when the returned guard drops.
#[must_use]
pub fn init_tracing() -> DefaultGuard {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fencepost=debug,fencepost_paxos=debug")),
        )
        .with_test_writer()
        .finish();
    tracing::dispatcher::set_default(&Dispatch::new(subscriber))
}

#[derive(Debug)]
pub struct Unreachable;

impl std::fmt::Display for Unreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("acceptor unreachable")
    }
}

impl std::error::Error for Unreachable {}

/// One node's link to one acceptor. Cutting it fails every call with
/// [`Unreachable`] without touching the acceptor itself. Every call waits
/// out the link's latency first.
#[derive(Clone)]
pub struct LinkedAcceptor {
    inner: MemoryAcceptor,
    up: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl LinkedAcceptor {
    async fn check(&self) -> Result<(), Report<Unreachable>> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Report::new(Unreachable).attach(format!("acceptor: {}", self.inner.id())))
        }
    }
}

impl AcceptorClient<Scope, Candidate> for LinkedAcceptor {
    type Error = Unreachable;

    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn prepare(
        &self,
        scope: &Scope,
        seq: Sequence,
        proposal: &ProposalId,
    ) -> Result<PrepareResponse<Candidate>, Report<Unreachable>> {
        self.check().await?;
        self.inner
            .prepare(scope, seq, proposal)
            .await
            .change_context(Unreachable)
    }

    async fn accept(
        &self,
        scope: &Scope,
        seq: Sequence,
        proposal: &ProposalId,
        value: &Candidate,
    ) -> Result<AcceptResponse, Report<Unreachable>> {
        self.check().await?;
        self.inner
            .accept(scope, seq, proposal, value)
            .await
            .change_context(Unreachable)
    }

    async fn latest_sequence(&self, scope: &Scope) -> Result<Option<Sequence>, Report<Unreachable>> {
        self.check().await?;
        self.inner
            .latest_sequence(scope)
            .await
            .change_context(Unreachable)
    }
}

/// Coordinator config with short timeouts and a short unlock window, suited
/// to in-process clusters.
#[must_use]
pub fn test_config(node_id: &str) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(node_id);
    config.election = ElectionConfig {
        backoff: BackoffConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(20),
            multiplier: 2.0,
        },
        phase_timeout: Duration::from_millis(200),
        max_attempts: 8,
    };
    config.batcher = BatcherConfig {
        window: Duration::from_millis(5),
        ..BatcherConfig::default()
    };
    config
}

pub struct TestCluster {
    acceptor_stores: Vec<MemoryKvStore>,
    handlers: Vec<Arc<KvAcceptorHandler<MemoryKvStore>>>,
    store: MemoryKvStore,
    clock: ManualClock,
}

impl TestCluster {
    #[must_use]
    pub fn new(acceptors: usize) -> Self {
        let acceptor_stores: Vec<MemoryKvStore> =
            (0..acceptors).map(|_| MemoryKvStore::new()).collect();
        let handlers = Self::handlers_for(&acceptor_stores);
        Self {
            acceptor_stores,
            handlers,
            store: MemoryKvStore::new(),
            clock: ManualClock::starting_at(START_MILLIS),
        }
    }

    fn handlers_for(stores: &[MemoryKvStore]) -> Vec<Arc<KvAcceptorHandler<MemoryKvStore>>> {
        stores
            .iter()
            .map(|store| Arc::new(AcceptorHandler::new(KvAcceptorStore::new(store.clone()))))
            .collect()
    }

    /// Simulate every acceptor process restarting on its durable state.
    /// Nodes created afterwards talk to the new processes.
    pub fn restart_acceptors(&mut self) {
        self.handlers = Self::handlers_for(&self.acceptor_stores);
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.handlers.len()
    }

    /// The external store holding fence, timestamp and lease records.
    #[must_use]
    pub fn store(&self) -> &MemoryKvStore {
        &self.store
    }

    /// The durable state of acceptor `index`.
    #[must_use]
    pub fn acceptor_store(&self, index: usize) -> &MemoryKvStore {
        &self.acceptor_stores[index]
    }

    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// A coordinator node with fresh links to every acceptor.
    #[must_use]
    pub fn node(&self, node_id: &str) -> TestNode {
        self.node_with(test_config(node_id))
    }

    #[must_use]
    pub fn node_with(&self, config: CoordinatorConfig) -> TestNode {
        let links: Vec<LinkedAcceptor> = self
            .handlers
            .iter()
            .enumerate()
            .map(|(i, handler)| LinkedAcceptor {
                inner: LocalAcceptor::shared(format!("acceptor-{i}"), handler.clone()),
                up: Arc::new(AtomicBool::new(true)),
                latency_ms: Arc::new(AtomicU64::new(0)),
            })
            .collect();
        let coordinator = Coordinator::with_clock(
            config,
            links.clone(),
            self.store.clone(),
            self.clock.clone(),
        );
        TestNode {
            coordinator: Arc::new(coordinator),
            links,
        }
    }
}

pub struct TestNode {
    coordinator: Arc<TestCoordinator>,
    links: Vec<LinkedAcceptor>,
}

impl TestNode {
    #[must_use]
    pub fn coordinator(&self) -> &Arc<TestCoordinator> {
        &self.coordinator
    }

    /// A client facade for `scope`. Needs a tokio runtime.
    #[must_use]
    pub fn client(&self, scope: &Scope) -> TestClient {
        self.coordinator.client(scope)
    }

    /// Cut this node off from the given acceptors.
    pub fn isolate(&self, acceptors: &[usize]) {
        for &i in acceptors {
            self.links[i].up.store(false, Ordering::SeqCst);
        }
    }

    /// Leave this node connected to exactly `acceptors`.
    pub fn connect_only(&self, acceptors: &[usize]) {
        for (i, link) in self.links.iter().enumerate() {
            link.up.store(acceptors.contains(&i), Ordering::SeqCst);
        }
    }

    /// Delay every call this node makes to any acceptor.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        for link in &self.links {
            link.latency_ms.store(millis, Ordering::SeqCst);
        }
    }

    pub fn heal(&self) {
        for link in &self.links {
            link.up.store(true, Ordering::SeqCst);
        }
    }
}

/// The scope most tests run in.
#[must_use]
pub fn test_scope() -> Scope {
    Scope::new("test", "client")
}
