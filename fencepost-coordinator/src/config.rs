//! Coordinator configuration
//!
//! Every struct has a `Default` and deserializes with missing fields falling
//! back to it, so a host can load any subset from its own config source.
//! Durations are given in milliseconds.

use std::time::Duration;

use fencepost_paxos::config::{BackoffConfig, ProposerConfig, TokioSleep, millis};
use serde::Deserialize;

/// Leadership election settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Backoff between attempts after a higher proposal was seen
    pub backoff: BackoffConfig,
    /// How long each Paxos phase waits for a majority
    #[serde(with = "millis")]
    pub phase_timeout: Duration,
    /// Attempts before an election reports `Unsuccessful`
    pub max_attempts: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            phase_timeout: Duration::from_secs(2),
            max_attempts: 8,
        }
    }
}

impl ElectionConfig {
    pub(crate) fn proposer_config(&self) -> ProposerConfig<TokioSleep> {
        ProposerConfig::default()
            .with_backoff(self.backoff.clone())
            .with_phase_timeout(self.phase_timeout)
            .with_max_attempts(self.max_attempts)
    }
}

/// Timestamp oracle settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Timestamps reserved per fenced write of the persisted bound
    pub batch_size: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

/// Lock authority settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Backoff between attempts of an `acquire` that carries a timeout
    pub retry: BackoffConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry: BackoffConfig {
                initial: Duration::from_millis(20),
                max: Duration::from_millis(500),
                multiplier: 2.0,
            },
        }
    }
}

/// Unlock batcher settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// How long the first release of a batch waits for company
    #[serde(with = "millis")]
    pub window: Duration,
    /// Most tokens carried by one downstream release
    pub max_batch: usize,
    /// Queue capacity; enqueues beyond it are dropped
    pub capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10),
            max_batch: 256,
            capacity: 1024,
        }
    }
}

/// Everything a coordinator node needs besides its acceptors and store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stable identity of this node; breaks ties between equal rounds
    pub node_id: String,
    pub election: ElectionConfig,
    pub oracle: OracleConfig,
    pub lock: LockConfig,
    pub batcher: BatcherConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: "coordinator".to_owned(),
            election: ElectionConfig::default(),
            oracle: OracleConfig::default(),
            lock: LockConfig::default(),
            batcher: BatcherConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}
