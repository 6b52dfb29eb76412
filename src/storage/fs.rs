//! Filesystem-backed object store. Each key maps to a file under the root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::BlobStore;
use crate::error::StorageError;

/// Object store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the root directory exists.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Map a key to a path, refusing anything that would leave the root.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsBlobStore) {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        (tmp, store)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let (_tmp, store) = store();
        store.put("staging/m1", b"raw mail").await.unwrap();
        assert_eq!(store.get("staging/m1").await.unwrap(), b"raw mail");

        store.delete("staging/m1").await.unwrap();
        assert!(matches!(
            store.get("staging/m1").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let (_tmp, store) = store();
        store.delete("staging/nothing").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_tmp, store) = store();
        for key in ["../outside", "attachments/c/m/../../../x", "/etc/passwd", ""] {
            assert!(
                matches!(store.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let (_tmp, store) = store();
        store.put("conversations/a/1", b"1").await.unwrap();
        store.put("conversations/a/2", b"2").await.unwrap();
        store.put("conversations/b/1", b"3").await.unwrap();
        store.put("staging/9", b"4").await.unwrap();

        let keys = store.list("conversations/a/").await.unwrap();
        assert_eq!(keys, vec!["conversations/a/1", "conversations/a/2"]);
        assert!(store.list("spam/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_on_missing_root() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path().join("not-yet"));
        assert!(store.list("").await.unwrap().is_empty());
        store.ensure_root().await.unwrap();
        assert!(tmp.path().join("not-yet").exists());
    }
}
