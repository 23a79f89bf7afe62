//! Blob store contract and the newer-object poller.
//!
//! The pipeline's collaborator interface to object storage: put/get/head
//! plus a paginated list that callers must follow to exhaustion. The
//! reconciler's question — "did anything appear under this prefix since
//! T?" — is answered by [`has_objects_newer_than`], which walks every
//! page but short-circuits on the first qualifying object.

use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub mod fs;
pub mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// One page of a listing. `next_token` present means the listing is
/// incomplete and the caller must request the following page.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub next_token: Option<String>,
}

/// Storage contract consumed by the pipeline and the reconciler.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn ObjectStore>`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes an object, replacing any existing one under the key.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Reads an object. Missing keys are [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns whether an object exists under the key. Absence is a
    /// `false`, not an error.
    async fn head(&self, key: &str) -> Result<bool, StoreError>;

    /// Lists objects under a key prefix, one page at a time.
    ///
    /// An empty or unknown prefix yields an empty page, not an error.
    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, StoreError>;
}

/// True when any object under `prefix` was modified at or after `since`.
///
/// Follows continuation tokens until the listing is exhausted — a
/// single-page check would silently miss later pages — but returns on
/// the first qualifying object without scanning the rest.
pub async fn has_objects_newer_than(
    store: &dyn ObjectStore,
    prefix: &str,
    since: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let mut token: Option<String> = None;
    loop {
        let page = store.list(prefix, token.as_deref()).await?;
        if page
            .objects
            .iter()
            .any(|object| object.last_modified >= since)
        {
            return Ok(true);
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn meta(key: &str, at: DateTime<Utc>) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            last_modified: at,
            size: 1,
        }
    }

    #[tokio::test]
    async fn test_newer_than_empty_prefix_is_false() {
        let store = MemoryObjectStore::new();
        let found = has_objects_newer_than(&store, "acme/", Utc::now())
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn test_newer_than_checks_threshold() {
        let t0 = Utc::now();
        let store = MemoryObjectStore::new();
        store.insert_with_time(meta("acme/shoes.jsonl", t0 - TimeDelta::seconds(10)), b"old");

        assert!(!has_objects_newer_than(&store, "acme/", t0).await.unwrap());

        store.insert_with_time(meta("acme/bags.jsonl", t0 + TimeDelta::seconds(1)), b"new");
        assert!(has_objects_newer_than(&store, "acme/", t0).await.unwrap());
    }

    #[tokio::test]
    async fn test_newer_than_crosses_page_boundaries() {
        let t0 = Utc::now();
        let store = MemoryObjectStore::with_page_size(2);
        // Five stale objects fill the first pages; the qualifying one
        // lands on the last page.
        for i in 0..5 {
            store.insert_with_time(
                meta(&format!("acme/stale-{}.jsonl", i), t0 - TimeDelta::seconds(60)),
                b"old",
            );
        }
        store.insert_with_time(meta("acme/zz-fresh.jsonl", t0 + TimeDelta::seconds(5)), b"new");

        assert!(has_objects_newer_than(&store, "acme/", t0).await.unwrap());
    }

    #[tokio::test]
    async fn test_newer_than_only_sees_the_prefix() {
        let t0 = Utc::now();
        let store = MemoryObjectStore::new();
        store.insert_with_time(meta("other/fresh.jsonl", t0 + TimeDelta::seconds(5)), b"new");

        assert!(!has_objects_newer_than(&store, "acme/", t0).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates_error() {
        let store = MemoryObjectStore::new();
        store.set_unavailable(true);

        let err = has_objects_newer_than(&store, "acme/", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
