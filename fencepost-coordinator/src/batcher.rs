//! Asynchronous unlock batching.
//!
//! Callers hand tokens to [`UnlockBatcher::enqueue`], which never blocks. A
//! draining task collects everything that arrives within `window` of the
//! first pending release and forwards the union downstream as one call of at
//! most `max_batch` tokens. Downstream failures are logged and dropped;
//! unreleased leases simply expire.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use fencepost_core::LockToken;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::config::BatcherConfig;
use crate::error::CoordinationError;

/// Downstream of the batcher: the release path of a lock authority.
pub trait ReleaseSink: Send + Sync + 'static {
    fn release_batch(
        &self,
        tokens: Vec<LockToken>,
    ) -> impl Future<Output = Result<(), Report<CoordinationError>>> + Send;
}

pub struct UnlockBatcher {
    tx: mpsc::Sender<Vec<LockToken>>,
    task: JoinHandle<()>,
}

impl UnlockBatcher {
    /// Start the draining task on the current tokio runtime.
    pub fn spawn<R: ReleaseSink>(sink: Arc<R>, config: &BatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let task = tokio::spawn(drain(sink, rx, config.window, config.max_batch.max(1)));
        Self { tx, task }
    }

    /// Queue `tokens` for release. Drops them with a warning if the queue is
    /// full or the batcher is closed.
    pub fn enqueue(&self, tokens: Vec<LockToken>) {
        if tokens.is_empty() {
            return;
        }
        match self.tx.try_send(tokens) {
            Ok(()) => {}
            Err(TrySendError::Full(tokens)) => {
                warn!(dropped = tokens.len(), "unlock queue full, dropping release");
            }
            Err(TrySendError::Closed(tokens)) => {
                debug!(dropped = tokens.len(), "unlock batcher closed");
            }
        }
    }

    /// Stop accepting releases, flush what is queued, and wait for the
    /// draining task to finish.
    pub async fn close(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!(error = %e, "unlock batcher task failed");
        }
    }
}

async fn drain<R: ReleaseSink>(
    sink: Arc<R>,
    mut rx: mpsc::Receiver<Vec<LockToken>>,
    window: Duration,
    max_batch: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch: BTreeSet<LockToken> = first.into_iter().collect();
        let deadline = Instant::now() + window;

        while batch.len() < max_batch {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(tokens)) => batch.extend(tokens),
                Ok(None) | Err(_) => break,
            }
        }

        let tokens: Vec<LockToken> = batch.into_iter().collect();
        for chunk in tokens.chunks(max_batch) {
            trace!(tokens = chunk.len(), "releasing batch");
            if let Err(report) = sink.release_batch(chunk.to_vec()).await {
                warn!(?report, tokens = chunk.len(), "batched release failed");
            }
        }
    }
    debug!("unlock batcher drained");
}
