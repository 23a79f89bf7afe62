//! In-memory object store for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use super::{ListPage, ObjectMeta, ObjectStore};
use crate::error::StoreError;

const DEFAULT_PAGE_SIZE: usize = 1000;

struct Stored {
    meta: ObjectMeta,
    bytes: Vec<u8>,
}

/// Object store backed by a `BTreeMap`, with real pagination semantics
/// and a switch to simulate an unreachable backend.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Stored>>,
    page_size: usize,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Small page sizes make pagination-boundary behavior testable.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the backend being unreachable: every operation returns
    /// [`StoreError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Inserts an object with explicit metadata (fixed `last_modified`).
    pub fn insert_with_time(&self, meta: ObjectMeta, bytes: &[u8]) {
        let mut objects = self.objects.lock().expect("store lock");
        objects.insert(
            meta.key.clone(),
            Stored {
                meta,
                bytes: bytes.to_vec(),
            },
        );
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_available()?;
        self.insert_with_time(
            ObjectMeta {
                key: key.to_string(),
                last_modified: Utc::now(),
                size: bytes.len() as u64,
            },
            bytes,
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.check_available()?;
        let objects = self.objects.lock().expect("store lock");
        objects
            .get(key)
            .map(|stored| stored.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let objects = self.objects.lock().expect("store lock");
        Ok(objects.contains_key(key))
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, StoreError> {
        self.check_available()?;
        let objects = self.objects.lock().expect("store lock");

        let mut page = Vec::with_capacity(self.page_size);
        let mut next_token = None;
        for (key, stored) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            // Keys are iterated in order; the token is the last key of
            // the previous page.
            if let Some(after) = token {
                if key.as_str() <= after {
                    continue;
                }
            }
            if page.len() == self.page_size {
                next_token = page.last().map(|m: &ObjectMeta| m.key.clone());
                break;
            }
            page.push(stored.meta.clone());
        }

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_head() {
        let store = MemoryObjectStore::new();
        store.put("acme/shoes.jsonl", b"{}").await.unwrap();

        assert!(store.head("acme/shoes.jsonl").await.unwrap());
        assert!(!store.head("acme/missing.jsonl").await.unwrap());
        assert_eq!(store.get("acme/shoes.jsonl").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_paginates_to_exhaustion() {
        let store = MemoryObjectStore::with_page_size(2);
        for i in 0..5 {
            store
                .put(&format!("acme/obj-{}.jsonl", i), b"x")
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = store.list("acme/", token.as_deref()).await.unwrap();
            seen.extend(page.objects.into_iter().map(|m| m.key));
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], "acme/obj-0.jsonl");
        assert_eq!(seen[4], "acme/obj-4.jsonl");
    }

    #[tokio::test]
    async fn test_list_unknown_prefix_is_empty() {
        let store = MemoryObjectStore::new();
        let page = store.list("ghost/", None).await.unwrap();
        assert!(page.objects.is_empty());
        assert!(page.next_token.is_none());
    }
}
