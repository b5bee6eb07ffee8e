//! External key-value store contract
//!
//! Every durable write in the system goes through
//! [`KvStore::compare_and_swap`]. A successful swap is durable by the time it
//! returns `true`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use error_stack::Report;

use crate::error::StoreError;

pub trait KvStore: Clone + Send + Sync + 'static {
    fn read(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Report<StoreError>>> + Send;

    /// Write `new` iff the current value equals `expected` (`None` = absent).
    ///
    /// Returns `false` without writing on mismatch.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> impl Future<Output = Result<bool, Report<StoreError>>> + Send;
}

/// Volatile store for tests and single-process clusters.
#[derive(Clone, Default, Debug)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys starting with `prefix`, in order.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl KvStore for MemoryKvStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, Report<StoreError>> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        entries.insert(key.to_owned(), new.to_vec());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cas_from_absent() {
        let store = MemoryKvStore::new();
        assert!(store.compare_and_swap("k", None, b"one").await.unwrap());
        assert!(!store.compare_and_swap("k", None, b"two").await.unwrap());
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some(&b"one"[..]));
    }

    #[tokio::test]
    async fn test_cas_requires_matching_value() {
        let store = MemoryKvStore::new();
        store.compare_and_swap("k", None, b"one").await.unwrap();

        assert!(!store.compare_and_swap("k", Some(b"zero"), b"two").await.unwrap());
        assert!(store.compare_and_swap("k", Some(b"one"), b"two").await.unwrap());
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn test_prefix_listing() {
        let store = MemoryKvStore::new();
        for key in ["lease/a", "lease/b", "leases", "epoch/x"] {
            store.compare_and_swap(key, None, b"v").await.unwrap();
        }
        assert_eq!(store.keys_with_prefix("lease/"), vec!["lease/a", "lease/b"]);
    }
}
