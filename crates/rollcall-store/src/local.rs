//! Photo storage in a local directory.

use rollcall_core::{ObjectStore, ObjectStoreError};
use std::path::PathBuf;

pub struct LocalDirStore {
    dir: PathBuf,
}

impl LocalDirStore {
    /// The directory is created on first upload.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalDirStore {
    async fn upload(&self, name_hint: &str, jpeg: Vec<u8>) -> Result<String, ObjectStoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{name_hint}_{}.jpg", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, &jpeg).await?;
        tracing::debug!(path = %path.display(), bytes = jpeg.len(), "photo written");
        Ok(path.display().to_string())
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path().join("photos"));

        let reference = store.upload("face_42", vec![0xFF, 0xD8, 0xFF]).await.unwrap();
        let path = PathBuf::from(&reference);
        assert!(path.starts_with(dir.path().join("photos")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("face_42_"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn test_same_hint_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let a = store.upload("face_1", vec![1]).await.unwrap();
        let b = store.upload("face_1", vec![2]).await.unwrap();
        assert_ne!(a, b);
    }
}
