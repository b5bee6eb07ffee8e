//! Store keyspaces and the postcard-encoded records kept in them

use std::fmt::{self, Write as _};

use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{KeyContext, StoreError};
use crate::store::KvStore;
use crate::{Epoch, Lease, LeadershipId, LockDescriptor, Scope};

/// Key builders for every keyspace.
///
/// Scope and resource names are written as [`Segment`]s, so a `/` inside a
/// name never lines up with a separator and distinct scopes never share a key.
pub mod keys {
    use super::{LockDescriptor, Scope, Segment};

    /// `acceptor/{useCase}/{clientKey}/{seq}`
    #[must_use]
    pub fn acceptor_slot(scope: &Scope, seq: u64) -> String {
        format!(
            "acceptor/{}/{}/{seq}",
            Segment(&scope.use_case),
            Segment(&scope.client_key)
        )
    }

    /// Highest accepted sequence of a scope, kept next to its slots.
    #[must_use]
    pub fn acceptor_latest(scope: &Scope) -> String {
        format!(
            "acceptor/{}/{}/latest",
            Segment(&scope.use_case),
            Segment(&scope.client_key)
        )
    }

    /// `lease/{useCase}/{clientKey}/{resource}`
    #[must_use]
    pub fn lease(scope: &Scope, resource: &LockDescriptor) -> String {
        format!(
            "lease/{}/{}/{}",
            Segment(&scope.use_case),
            Segment(&scope.client_key),
            Segment(resource.as_str())
        )
    }

    /// `timestampBound/{useCase}/{clientKey}`
    #[must_use]
    pub fn timestamp_bound(scope: &Scope) -> String {
        format!(
            "timestampBound/{}/{}",
            Segment(&scope.use_case),
            Segment(&scope.client_key)
        )
    }

    /// `epoch/{useCase}/{clientKey}`
    #[must_use]
    pub fn fence(scope: &Scope) -> String {
        format!("epoch/{}/{}", Segment(&scope.use_case), Segment(&scope.client_key))
    }
}

/// One key component with `%` and `/` percent-encoded.
struct Segment<'a>(&'a str);

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '%' => f.write_str("%25")?,
                '/' => f.write_str("%2F")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Newest leadership that claimed a scope. Only ever raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceRecord {
    pub epoch: Epoch,
    pub leadership: LeadershipId,
}

/// Persisted high-water mark of the timestamp oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundRecord {
    pub epoch: Epoch,
    /// No timestamp at or above this has been handed out
    pub upper: u64,
}

/// Lease state of one resource. `lease` is `None` once released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub epoch: Epoch,
    pub lease: Option<Lease>,
}

/// A decoded record together with the exact bytes it was read from, which
/// are the `expected` value for a later compare-and-swap.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub raw: Vec<u8>,
    pub value: T,
}

/// # Errors
/// Fails if `value` cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Report<StoreError>> {
    postcard::to_allocvec(value)
        .change_context(StoreError)
        .attach("failed to encode record")
}

/// # Errors
/// Fails if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, Report<StoreError>> {
    postcard::from_bytes(bytes)
        .change_context(StoreError)
        .attach(KeyContext::new(key))
        .attach("corrupt record")
}

/// Read and decode the record at `key`.
///
/// # Errors
/// Fails on store errors or corrupt records.
pub async fn read_record<S, T>(store: &S, key: &str) -> Result<Option<Stored<T>>, Report<StoreError>>
where
    S: KvStore,
    T: DeserializeOwned,
{
    let Some(raw) = store.read(key).await? else {
        return Ok(None);
    };
    let value = decode(key, &raw)?;
    Ok(Some(Stored { raw, value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    #[test]
    fn test_keys_follow_keyspace_layout() {
        let scope = Scope::new("billing", "tenant-7");
        assert_eq!(keys::acceptor_slot(&scope, 12), "acceptor/billing/tenant-7/12");
        assert_eq!(keys::fence(&scope), "epoch/billing/tenant-7");
        assert_eq!(keys::timestamp_bound(&scope), "timestampBound/billing/tenant-7");
        assert_eq!(
            keys::lease(&scope, &LockDescriptor::new("r1")),
            "lease/billing/tenant-7/r1"
        );
    }

    #[test]
    fn test_slashes_in_names_do_not_merge_scopes() {
        let left = Scope::new("a/b", "c");
        let right = Scope::new("a", "b/c");
        assert_ne!(keys::fence(&left), keys::fence(&right));
        assert_ne!(keys::timestamp_bound(&left), keys::timestamp_bound(&right));
        assert_ne!(keys::acceptor_slot(&left, 1), keys::acceptor_slot(&right, 1));
        assert_ne!(keys::acceptor_latest(&left), keys::acceptor_latest(&right));
        assert_eq!(keys::fence(&left), "epoch/a%2Fb/c");

        let resource = LockDescriptor::new("x");
        assert_ne!(keys::lease(&left, &resource), keys::lease(&right, &resource));

        // An escaped-looking name stays distinct from the name it resembles
        let literal = Scope::new("a%2Fb", "c");
        assert_ne!(keys::fence(&literal), keys::fence(&left));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let store = MemoryKvStore::new();
        store.compare_and_swap("epoch/a/b", None, &[0xff; 3]).await.unwrap();
        let result = read_record::<_, FenceRecord>(&store, "epoch/a/b").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stored_raw_matches_store_bytes() {
        let store = MemoryKvStore::new();
        let record = BoundRecord {
            epoch: Epoch(3),
            upper: 1000,
        };
        let bytes = encode(&record).unwrap();
        store.compare_and_swap("k", None, &bytes).await.unwrap();

        let stored: Stored<BoundRecord> = read_record(&store, "k").await.unwrap().unwrap();
        assert_eq!(stored.value, record);
        assert_eq!(stored.raw, bytes);
    }
}
