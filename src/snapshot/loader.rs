//! Import side: turns an artifact back into store rows and asset files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::{content_type_for, StorageBackend};

use super::bundle::{self, asset_key};
use super::restore::{self, Operator, RestoreOptions};
use super::{codec, decode_envelope, RestoreSummary, Snapshot, SnapshotMode};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub mode: SnapshotMode,
    pub wipe_first: bool,
    pub operator: Option<Operator>,
}

impl RestoreRequest {
    pub fn new(mode: SnapshotMode, wipe_first: bool) -> Self {
        Self {
            mode,
            wipe_first,
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }
}

/// Archive contents waiting in a private staging directory.
struct Staged {
    dir: TempDir,
    keys: Vec<String>,
}

/// Asset writes of a restore that has not committed yet, with what each key
/// held before. Dropping it armed reverts them on a spawned task, which keeps
/// the restore lock until the asset store is back to its prior state.
struct AssetRollback {
    storage: Arc<dyn StorageBackend>,
    written: Vec<(String, Option<Vec<u8>>)>,
    lock: Option<OwnedMutexGuard<()>>,
}

impl AssetRollback {
    fn new(storage: Arc<dyn StorageBackend>, lock: OwnedMutexGuard<()>) -> Self {
        Self {
            storage,
            written: Vec::new(),
            lock: Some(lock),
        }
    }

    fn record(&mut self, key: &str, previous: Option<Vec<u8>>) {
        self.written.push((key.to_string(), previous));
    }

    fn disarm(mut self) {
        self.written.clear();
    }

    async fn undo(mut self) {
        let written = std::mem::take(&mut self.written);
        revert_assets(self.storage.as_ref(), written).await;
    }
}

impl Drop for AssetRollback {
    fn drop(&mut self) {
        if self.written.is_empty() {
            return;
        }
        let written = std::mem::take(&mut self.written);
        let storage = self.storage.clone();
        let lock = self.lock.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Restore abandoned, reverting {} assets", written.len());
                handle.spawn(async move {
                    revert_assets(storage.as_ref(), written).await;
                    drop(lock);
                });
            }
            Err(_) => tracing::error!(
                "Restore abandoned outside a runtime, {} assets were not reverted",
                written.len()
            ),
        }
    }
}

async fn revert_assets(storage: &dyn StorageBackend, written: Vec<(String, Option<Vec<u8>>)>) {
    for (key, previous) in written.into_iter().rev() {
        let result = match previous {
            Some(bytes) => storage
                .upload(&key, &bytes, content_type_for(&key))
                .await
                .map(|_| ()),
            None => storage.delete(&key).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to revert restored asset {}: {}", key, e);
        }
    }
}

#[derive(Clone)]
pub struct SnapshotLoader {
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
    lock: Arc<Mutex<()>>,
    staging_root: Option<PathBuf>,
}

impl SnapshotLoader {
    pub fn new(pool: SqlitePool, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            pool,
            storage,
            lock: Arc::new(Mutex::new(())),
            staging_root: None,
        }
    }

    /// Stages archives under `root` instead of the system temp dir.
    pub fn with_staging_root(mut self, root: Option<PathBuf>) -> Self {
        self.staging_root = root;
        self
    }

    pub async fn import_lightweight(
        &self,
        text: &str,
        wipe_first: bool,
        operator: Option<Operator>,
    ) -> AppResult<RestoreSummary> {
        let request = RestoreRequest {
            mode: SnapshotMode::Json,
            wipe_first,
            operator,
        };
        self.restore(text.as_bytes(), &request).await
    }

    /// `envelope` is the base64 text of the archive.
    pub async fn import_full(
        &self,
        envelope: &str,
        wipe_first: bool,
        operator: Option<Operator>,
    ) -> AppResult<RestoreSummary> {
        let archive = decode_envelope(envelope)?;
        let request = RestoreRequest {
            mode: SnapshotMode::Archive,
            wipe_first,
            operator,
        };
        self.restore(&archive, &request).await
    }

    /// Restores `artifact` (JSON text or raw archive bytes) as one unit.
    ///
    /// Either every row and referenced asset lands, or the store is left as it
    /// was. Dropping the returned future rolls back the transaction and
    /// removes the staging directory; asset writes are reverted in the
    /// background before the next restore may start.
    pub async fn restore(
        &self,
        artifact: &[u8],
        request: &RestoreRequest,
    ) -> AppResult<RestoreSummary> {
        let lock = self
            .lock
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::RestoreInProgress)?;
        let mut assets = AssetRollback::new(self.storage.clone(), lock);

        let restore_id = Uuid::new_v4();
        tracing::info!(
            "Restore {} started: mode={}, wipe_first={}, {} bytes",
            restore_id,
            request.mode.as_str(),
            request.wipe_first,
            artifact.len()
        );

        let (payload, staged) = match request.mode {
            SnapshotMode::Json => {
                let text = std::str::from_utf8(artifact).map_err(|_| {
                    AppError::CorruptPayload("snapshot is not valid UTF-8".to_string())
                })?;
                (text.to_string(), None)
            }
            SnapshotMode::Archive => {
                let (payload, staged) = self.stage(artifact.to_vec()).await?;
                (payload, Some(staged))
            }
        };

        let snapshot = codec::decode(&payload)?;
        let options = RestoreOptions {
            wipe_first: request.wipe_first,
            operator: request.operator.clone(),
        };

        let mut tx = self.pool.begin().await?;
        let applied = match restore::apply(&mut tx, &snapshot, &options).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!("Restore {} rolled back: {}", restore_id, e);
                tx.rollback().await.map_err(rollback_failed)?;
                return Err(e);
            }
        };

        let (assets_restored, assets_ignored) = match &staged {
            Some(staged) => match self.commit_assets(&snapshot, staged, &mut assets).await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::error!("Restore {} rolled back: {}", restore_id, e);
                    let rolled_back = tx.rollback().await;
                    assets.undo().await;
                    rolled_back.map_err(rollback_failed)?;
                    return Err(e);
                }
            },
            None => (0, 0),
        };

        if let Err(e) = tx.commit().await {
            tracing::error!("Restore {} failed to commit: {}", restore_id, e);
            assets.undo().await;
            return Err(e.into());
        }
        assets.disarm();

        let summary = RestoreSummary {
            mode: Some(request.mode),
            wiped: applied.wiped.iter().map(|k| k.key().to_string()).collect(),
            written: applied.written,
            skipped_users: applied.skipped_users,
            assets_restored,
            assets_ignored,
        };
        tracing::info!(
            "Restore {} committed: {} rows, {} assets restored, {} assets ignored, {} users skipped",
            restore_id,
            summary.total_written(),
            summary.assets_restored,
            summary.assets_ignored,
            summary.skipped_users
        );
        Ok(summary)
    }

    async fn stage(&self, archive: Vec<u8>) -> AppResult<(String, Staged)> {
        let dir = self.staging_dir()?;
        let path = dir.path().to_path_buf();
        let unpacked = tokio::task::spawn_blocking(move || bundle::unpack(&archive, &path))
            .await
            .map_err(|e| AppError::Internal(format!("Unpack task failed: {}", e)))??;
        tracing::debug!("Staged {} assets in {}", unpacked.staged.len(), dir.path().display());
        Ok((
            unpacked.payload,
            Staged {
                dir,
                keys: unpacked.staged,
            },
        ))
    }

    fn staging_dir(&self) -> AppResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("snapshot-restore-");
        let result = match &self.staging_root {
            Some(root) => std::fs::create_dir_all(root).and_then(|_| builder.tempdir_in(root)),
            None => builder.tempdir(),
        };
        result.map_err(|e| AppError::Storage(format!("Failed to create staging dir: {}", e)))
    }

    /// Copies staged assets referenced by restored items into the live store.
    /// Every key is recorded in `assets` before it is touched.
    async fn commit_assets(
        &self,
        snapshot: &Snapshot,
        staged: &Staged,
        assets: &mut AssetRollback,
    ) -> AppResult<(usize, usize)> {
        let referenced: HashSet<&str> = snapshot
            .image_references()
            .into_iter()
            .filter_map(asset_key)
            .collect();

        let mut restored = 0;
        for key in staged.keys.iter().filter(|k| referenced.contains(k.as_str())) {
            let bytes = read_staged(staged.dir.path(), key).await?;
            let previous = if self.storage.exists(key).await? {
                Some(self.storage.download(key).await?)
            } else {
                None
            };
            assets.record(key, previous);
            self.storage
                .upload(key, &bytes, content_type_for(key))
                .await?;
            restored += 1;
        }

        let ignored = staged.keys.len() - restored;
        if ignored > 0 {
            tracing::debug!("{} archive assets are not referenced by any item", ignored);
        }
        Ok((restored, ignored))
    }
}

async fn read_staged(staging: &Path, key: &str) -> AppResult<Vec<u8>> {
    tokio::fs::read(staging.join(key))
        .await
        .map_err(|e| AppError::Storage(format!("Failed to read staged {}: {}", key, e)))
}

fn rollback_failed(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(format!("rollback failed, verify the store manually: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{store, testing};
    use crate::models::{EntityKind, Record};
    use crate::snapshot::{encode_envelope, SnapshotWriter};
    use crate::storage::LocalBackend;

    struct Fixture {
        _dir: tempfile::TempDir,
        pool: SqlitePool,
        storage: Arc<LocalBackend>,
        loader: SnapshotLoader,
        writer: SnapshotWriter,
    }

    async fn fixture() -> Fixture {
        let (dir, pool) = testing::pool().await;
        let storage = Arc::new(LocalBackend::new(dir.path().join("public")));
        let loader = SnapshotLoader::new(pool.clone(), storage.clone())
            .with_staging_root(Some(dir.path().join("staging")));
        let writer = SnapshotWriter::new(pool.clone(), storage.clone());
        Fixture {
            _dir: dir,
            pool,
            storage,
            loader,
            writer,
        }
    }

    async fn seed(pool: &SqlitePool, records: &[Record]) {
        let mut conn = pool.acquire().await.unwrap();
        for record in records {
            store::upsert(&mut conn, record).await.unwrap();
        }
    }

    async fn dump(pool: &SqlitePool) -> Vec<Vec<Record>> {
        let mut tables = Vec::new();
        for kind in EntityKind::ALL {
            tables.push(store::read_all(pool, kind).await.unwrap());
        }
        tables
    }

    #[tokio::test]
    async fn test_lightweight_round_trip_into_empty_store() {
        let source = fixture().await;
        let location = testing::location("L1", "Shelf A", None);
        let item = testing::item("I1", "Drill", Some("L1"));
        seed(&source.pool, &[location.clone(), item.clone()]).await;
        let artifact = source.writer.export_lightweight().await.unwrap();

        let target = fixture().await;
        let summary = target
            .loader
            .import_lightweight(&artifact.data, true, None)
            .await
            .unwrap();

        assert_eq!(summary.mode, Some(SnapshotMode::Json));
        assert_eq!(summary.written["locations"], 1);
        assert_eq!(summary.written["items"], 1);
        assert_eq!(store::read_all(&target.pool, EntityKind::Location).await.unwrap(), vec![location]);
        assert_eq!(store::read_all(&target.pool, EntityKind::Item).await.unwrap(), vec![item]);
    }

    #[tokio::test]
    async fn test_reimport_without_wipe_is_idempotent() {
        let fx = fixture().await;
        seed(
            &fx.pool,
            &[
                testing::brand("B1", "Bosch"),
                testing::location("L1", "Garage", None),
                testing::location("L2", "Shelf", Some("L1")),
                testing::item("I1", "Drill", Some("L2")),
                testing::lending("R1", "I1"),
                testing::history("H1", "I1"),
            ],
        )
        .await;
        let artifact = fx.writer.export_lightweight().await.unwrap();
        let before = dump(&fx.pool).await;

        fx.loader.import_lightweight(&artifact.data, false, None).await.unwrap();
        fx.loader.import_lightweight(&artifact.data, false, None).await.unwrap();

        assert_eq!(dump(&fx.pool).await, before);
    }

    #[tokio::test]
    async fn test_reimport_without_timestamps_keeps_first_write_time() {
        let fx = fixture().await;
        let text = r#"{
            "locations": [{"id": "L1", "name": "Shelf A"}],
            "items": [{"id": "I1", "name": "Drill", "locationId": "L1"}],
            "itemHistory": [{"id": "H1", "itemId": "I1", "action": "created"}]
        }"#;

        fx.loader.import_lightweight(text, false, None).await.unwrap();
        let once = dump(&fx.pool).await;
        let items = store::read_all(&fx.pool, EntityKind::Item).await.unwrap();
        assert!(items[0].text("createdAt").is_some());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        fx.loader.import_lightweight(text, false, None).await.unwrap();
        assert_eq!(dump(&fx.pool).await, once);
    }

    #[tokio::test]
    async fn test_full_round_trip_restores_images() {
        let source = fixture().await;
        source
            .storage
            .upload("uploads/drill.jpg", b"\xff\xd8drill", "image/jpeg")
            .await
            .unwrap();
        seed(&source.pool, &[testing::item_with_image("I1", "/uploads/drill.jpg")]).await;
        let artifact = source.writer.export_full().await.unwrap();

        let target = fixture().await;
        let summary = target
            .loader
            .import_full(&artifact.data, true, None)
            .await
            .unwrap();

        assert_eq!(summary.mode, Some(SnapshotMode::Archive));
        assert_eq!(summary.assets_restored, 1);
        assert_eq!(summary.assets_ignored, 0);
        assert_eq!(
            target.storage.download("uploads/drill.jpg").await.unwrap(),
            b"\xff\xd8drill".to_vec()
        );
        let items = store::read_all(&target.pool, EntityKind::Item).await.unwrap();
        assert_eq!(items[0].text("image"), Some("/uploads/drill.jpg"));
    }

    #[tokio::test]
    async fn test_unreferenced_archive_assets_are_ignored() {
        let fx = fixture().await;
        let payload = codec::encode(&Snapshot::new()).unwrap();
        let archive = bundle::pack(
            &payload,
            &[bundle::Asset {
                key: "uploads/stray.png".to_string(),
                bytes: b"png".to_vec(),
            }],
        )
        .unwrap();

        let summary = fx
            .loader
            .import_full(&encode_envelope(&archive), false, None)
            .await
            .unwrap();
        assert_eq!(summary.assets_ignored, 1);
        assert!(!fx.storage.exists("uploads/stray.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_unsafe_archive_leaves_everything_untouched() {
        let fx = fixture().await;
        seed(&fx.pool, &[testing::location("L1", "Garage", None)]).await;
        let before = dump(&fx.pool).await;

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            use std::io::Write;
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file(bundle::PAYLOAD_ENTRY, options).unwrap();
            zip.write_all(b"{\"locations\": []}").unwrap();
            zip.start_file("../../etc/passwd", options).unwrap();
            zip.write_all(b"root").unwrap();
            zip.finish().unwrap();
        }

        let err = fx
            .loader
            .import_full(&encode_envelope(&cursor.into_inner()), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsafeArchiveEntry(_)));
        assert_eq!(dump(&fx.pool).await, before);
    }

    #[tokio::test]
    async fn test_corrupt_inputs_are_rejected_before_writing() {
        let fx = fixture().await;

        let err = fx.loader.import_lightweight("{not json", true, None).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptPayload(_)));

        let err = fx.loader.import_full("%%%", true, None).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptPayload(_)));

        let err = fx
            .loader
            .import_lightweight("{\"items\": {}}", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_concurrent_restore_is_rejected() {
        let fx = fixture().await;
        let _held = fx.loader.lock.clone().lock_owned().await;

        let err = fx
            .loader
            .import_lightweight("{\"brands\": []}", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RestoreInProgress));
    }

    #[tokio::test]
    async fn test_lock_is_released_after_failure() {
        let fx = fixture().await;
        assert!(fx.loader.import_lightweight("nope", true, None).await.is_err());
        fx.loader.import_lightweight("{\"brands\": []}", true, None).await.unwrap();
    }

    /// Accepts reads but refuses every upload.
    struct ReadOnlyStorage;

    #[tonic::async_trait]
    impl StorageBackend for ReadOnlyStorage {
        async fn upload(&self, key: &str, _data: &[u8], _content_type: &str) -> AppResult<String> {
            Err(AppError::Storage(format!("read-only: {}", key)))
        }
        async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
            Err(AppError::Storage(format!("not found: {}", key)))
        }
        async fn exists(&self, _key: &str) -> AppResult<bool> {
            Ok(false)
        }
        async fn delete(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }
        fn location(&self) -> &str {
            "read-only"
        }
    }

    /// Local storage whose second upload either never finishes or fails.
    struct FlakyStorage {
        inner: LocalBackend,
        uploads: std::sync::atomic::AtomicUsize,
        stall: bool,
    }

    impl FlakyStorage {
        fn new(root: &Path, stall: bool) -> Self {
            Self {
                inner: LocalBackend::new(root),
                uploads: std::sync::atomic::AtomicUsize::new(0),
                stall,
            }
        }
    }

    #[tonic::async_trait]
    impl StorageBackend for FlakyStorage {
        async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> AppResult<String> {
            let n = self.uploads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 1 {
                if self.stall {
                    std::future::pending::<()>().await;
                }
                return Err(AppError::Storage(format!("disk full: {}", key)));
            }
            self.inner.upload(key, data, content_type).await
        }
        async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
            self.inner.download(key).await
        }
        async fn exists(&self, key: &str) -> AppResult<bool> {
            self.inner.exists(key).await
        }
        async fn delete(&self, key: &str) -> AppResult<()> {
            self.inner.delete(key).await
        }
        fn location(&self) -> &str {
            self.inner.location()
        }
    }

    const IMAGE_KEYS: [&str; 2] = ["uploads/a.jpg", "uploads/b.jpg"];

    async fn two_image_archive() -> String {
        let source = fixture().await;
        for key in IMAGE_KEYS {
            source.storage.upload(key, b"new", "image/jpeg").await.unwrap();
        }
        seed(
            &source.pool,
            &[
                testing::item_with_image("I1", "/uploads/a.jpg"),
                testing::item_with_image("I2", "/uploads/b.jpg"),
            ],
        )
        .await;
        source.writer.export_full().await.unwrap().data
    }

    #[tokio::test]
    async fn test_cancelled_restore_reverts_assets() {
        let archive = two_image_archive().await;
        let (dir, pool) = testing::pool().await;
        let public = dir.path().join("public");
        let loader = SnapshotLoader::new(pool.clone(), Arc::new(FlakyStorage::new(&public, true)));

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            loader.import_full(&archive, true, None),
        )
        .await;
        assert!(result.is_err());

        // The revert task holds the restore lock until it is done
        let mut settled = false;
        for _ in 0..200 {
            if loader.lock.try_lock().is_ok() {
                settled = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(settled);

        let local = LocalBackend::new(&public);
        for key in IMAGE_KEYS {
            assert!(!local.exists(key).await.unwrap(), "{} left behind", key);
        }
        assert!(store::read_all(&pool, EntityKind::Item).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_restore_puts_back_overwritten_assets() {
        let archive = two_image_archive().await;
        let (dir, pool) = testing::pool().await;
        let public = dir.path().join("public");
        let local = LocalBackend::new(&public);
        for key in IMAGE_KEYS {
            local.upload(key, b"old", "image/jpeg").await.unwrap();
        }
        let loader = SnapshotLoader::new(pool.clone(), Arc::new(FlakyStorage::new(&public, false)));

        let err = loader.import_full(&archive, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        for key in IMAGE_KEYS {
            assert_eq!(local.download(key).await.unwrap(), b"old".to_vec());
        }
        assert!(store::read_all(&pool, EntityKind::Item).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_asset_failure_rolls_back_rows() {
        let source = fixture().await;
        source
            .storage
            .upload("uploads/drill.jpg", b"jpeg", "image/jpeg")
            .await
            .unwrap();
        seed(&source.pool, &[testing::item_with_image("I1", "/uploads/drill.jpg")]).await;
        let artifact = source.writer.export_full().await.unwrap();

        let (_dir, pool) = testing::pool().await;
        seed(&pool, &[testing::brand("B1", "Makita")]).await;
        let before = dump(&pool).await;
        let loader = SnapshotLoader::new(pool.clone(), Arc::new(ReadOnlyStorage));

        let err = loader.import_full(&artifact.data, true, None).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(dump(&pool).await, before);
    }
}
