use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

use super::{ensure_safe_key, StorageBackend};

/// Assets stored as plain files under a root directory (the web app's `public/`).
pub struct LocalBackend {
    root: PathBuf,
    root_display: String,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root_display = root.display().to_string();
        Self { root, root_display }
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        ensure_safe_key(key)?;
        Ok(self.root.join(key))
    }
}

#[tonic::async_trait]
impl StorageBackend for LocalBackend {
    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> AppResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Local mkdir failed: {}", e)))?;
        }

        // Write beside the target and rename so readers never see a partial file
        let tmp = path.with_extension(format!("{}.partial", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| AppError::Storage(format!("Local write failed: {}", e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Storage(format!("Local rename failed: {}", e)));
        }

        tracing::debug!("Local upload: root={}, key={}", self.root_display, key);
        Ok(path.display().to_string())
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Local read failed for {}: {}", key, e)))
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Local stat failed for {}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Local delete failed for {}: {}", key, e))),
        }
    }

    fn location(&self) -> &str {
        &self.root_display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend
            .upload("uploads/drill.jpg", b"jpeg-bytes", "image/jpeg")
            .await
            .unwrap();
        assert!(backend.exists("uploads/drill.jpg").await.unwrap());
        assert_eq!(backend.download("uploads/drill.jpg").await.unwrap(), b"jpeg-bytes");

        backend.delete("uploads/drill.jpg").await.unwrap();
        assert!(!backend.exists("uploads/drill.jpg").await.unwrap());
        backend.delete("uploads/drill.jpg").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("uploads")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_keys_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("public"));

        let err = backend.upload("../escape.txt", b"x", "text/plain").await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
