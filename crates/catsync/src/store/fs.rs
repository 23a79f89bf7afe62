//! Directory-backed object store.
//!
//! Keys map to paths under a root directory ("bucket"), with `/` as the
//! separator. Last-modified times come from filesystem metadata, which
//! is what the reconciler compares against.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use super::{ListPage, ObjectMeta, ObjectStore};
use crate::error::StoreError;

const DEFAULT_PAGE_SIZE: usize = 1000;

pub struct FsObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size<P: AsRef<Path>>(root: P, page_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: page_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "..")
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// All keys under the prefix, sorted. Pagination slices this.
    fn collect_keys(&self, prefix: &str) -> Result<Vec<(String, ObjectMeta)>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| StoreError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?;
            let modified = metadata.modified().map_err(|e| StoreError::Io {
                path: entry.path().to_path_buf(),
                source: e,
            })?;

            entries.push((
                key.clone(),
                ObjectMeta {
                    key,
                    last_modified: DateTime::<Utc>::from(modified),
                    size: metadata.len(),
                },
            ));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| StoreError::Io { path, source: e })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.resolve(key)?;
        Ok(path.is_file())
    }

    async fn list(&self, prefix: &str, token: Option<&str>) -> Result<ListPage, StoreError> {
        let entries = self.collect_keys(prefix)?;

        let mut objects = Vec::with_capacity(self.page_size);
        let mut next_token = None;
        for (key, meta) in entries {
            if let Some(after) = token {
                if key.as_str() <= after {
                    continue;
                }
            }
            if objects.len() == self.page_size {
                next_token = objects.last().map(|m: &ObjectMeta| m.key.clone());
                break;
            }
            objects.push(meta);
        }

        Ok(ListPage {
            objects,
            next_token,
        })
    }
}
