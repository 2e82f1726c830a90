// Storage abstraction for item image assets (local directory or R2)

pub mod local;
pub mod r2;

pub use local::LocalBackend;
pub use r2::R2Backend;

use std::path::{Component, Path};
use std::sync::Arc;

use crate::config::{AssetBackend, Config};
use crate::error::{AppError, AppResult};

/// ストレージバックエンド抽象化（ローカル / R2 共通インタフェース）
///
/// Keys are relative, `/`-separated paths such as `uploads/drill.jpg`.
#[tonic::async_trait]
pub trait StorageBackend: Send + Sync {
    /// ファイルをアップロード。ストレージパス文字列を返す
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> AppResult<String>;

    /// ファイルをダウンロード
    async fn download(&self, key: &str) -> AppResult<Vec<u8>>;

    /// オブジェクトの存在確認
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// ファイルを削除（存在しない場合も成功）
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 保存先（ディレクトリまたはバケット名）
    fn location(&self) -> &str;
}

/// Builds the backend selected by configuration.
pub fn open_backend(config: &Config) -> AppResult<Arc<dyn StorageBackend>> {
    match &config.asset_backend {
        AssetBackend::Local { upload_dir } => {
            tracing::info!("Asset storage: local directory {}", upload_dir.display());
            Ok(Arc::new(LocalBackend::new(upload_dir.clone())))
        }
        AssetBackend::R2 {
            bucket,
            account_id,
            access_key,
            secret_key,
        } => {
            tracing::info!("Asset storage: R2 bucket={}", bucket);
            Ok(Arc::new(R2Backend::new(
                bucket.clone(),
                account_id.clone(),
                access_key.clone(),
                secret_key.clone(),
            )?))
        }
    }
}

/// True when `key` is a plain relative path that cannot leave its root.
pub fn is_safe_key(key: &str) -> bool {
    if key.is_empty() || key.contains('\\') || key.contains(':') || key.contains('\0') {
        return false;
    }
    Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

pub(crate) fn ensure_safe_key(key: &str) -> AppResult<()> {
    if is_safe_key(key) {
        Ok(())
    } else {
        Err(AppError::Storage(format!("refusing unsafe asset key '{}'", key)))
    }
}

/// Content type guessed from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let extension = Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
