//! Durable [`KvStore`] backed by fjall.

use std::path::Path;
use std::sync::{Arc, Mutex};

use error_stack::{Report, ResultExt};
use fencepost_core::{KeyContext, KvStore, StoreError};
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use tracing::debug;

struct Inner {
    db: Database,
    entries: Keyspace,
    /// Serialises compare-and-swap so the read and the write are atomic
    swap: Mutex<()>,
}

/// Single-keyspace fjall database. Every successful swap is synced to disk
/// before it is reported.
#[derive(Clone)]
pub struct FjallKvStore {
    inner: Arc<Inner>,
}

impl FjallKvStore {
    /// # Errors
    /// Fails if the database cannot be opened or created at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Report<StoreError>> {
        let path = path.as_ref().to_owned();
        debug!(?path, "opening fjall store");
        tokio::task::spawn_blocking(move || Self::open_sync(&path))
            .await
            .change_context(StoreError)
            .attach("open task panicked")?
    }

    fn open_sync(path: &Path) -> Result<Self, Report<StoreError>> {
        let db = Database::builder(path)
            .open()
            .change_context(StoreError)
            .attach("failed to open database")?;
        let entries = db
            .keyspace("entries", KeyspaceCreateOptions::default)
            .change_context(StoreError)
            .attach("failed to open keyspace")?;

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                entries,
                swap: Mutex::new(()),
            }),
        })
    }

    fn get_sync(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        let value = self
            .inner
            .entries
            .get(key)
            .change_context(StoreError)
            .attach_with(|| KeyContext::new(key))?;
        Ok(value.map(|slice| slice.to_vec()))
    }
}

impl KvStore for FjallKvStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        self.get_sync(key)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, Report<StoreError>> {
        let _guard = self.inner.swap.lock().unwrap();

        let current = self.get_sync(key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }

        self.inner
            .entries
            .insert(key, new)
            .change_context(StoreError)
            .attach_with(|| KeyContext::new(key))?;
        self.inner
            .db
            .persist(PersistMode::SyncAll)
            .change_context(StoreError)
            .attach("failed to sync")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_swaps_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FjallKvStore::open(dir.path()).await.unwrap();
            assert!(store.compare_and_swap("k", None, b"one").await.unwrap());
            assert!(!store.compare_and_swap("k", None, b"two").await.unwrap());
            assert!(store.compare_and_swap("k", Some(b"one"), b"two").await.unwrap());
        }

        let store = FjallKvStore::open(dir.path()).await.unwrap();
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.read("missing").await.unwrap(), None);
    }
}
