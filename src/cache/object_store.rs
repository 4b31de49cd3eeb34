//! Long-term object storage for snapshot archives and the common data blob.
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A store of opaque byte objects addressed by key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, returning `None` if there is nothing stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an object, replacing any existing object with the same key
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;
}

/// An object store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Use `root` as the storage directory. It is created on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Map a key onto a path inside the root directory
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        ensure!(
            !key.is_empty()
                && key
                    .split('/')
                    .all(|part| !part.is_empty() && part != "." && part != "..")
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./".contains(c)),
            "Invalid object key: {key}"
        );

        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Could not read {}", path.display())),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial object
        let tmp_path = path.with_extension("partial");
        tokio::fs::write(&tmp_path, data)
            .await
            .with_context(|| format!("Could not write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get() {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert_eq!(store.get("archives/a.bin").await.unwrap(), None);
        store.put("archives/a.bin", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("archives/a.bin").await.unwrap(), Some(vec![1, 2, 3]));

        store.put("archives/a.bin", vec![4]).await.unwrap();
        assert_eq!(store.get("archives/a.bin").await.unwrap(), Some(vec![4]));
    }

    #[rstest]
    #[case("")]
    #[case("../escape")]
    #[case("a//b")]
    #[case("/absolute")]
    #[case("spaces not allowed")]
    fn test_invalid_keys(#[case] key: &str) {
        let store = LocalObjectStore::new(Path::new("objects"));
        assert!(store.path_for(key).is_err());
    }
}
