//! Export side: reads the live graph and produces downloadable artifacts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::store;
use crate::error::{AppError, AppResult};
use crate::models::EntityKind;
use crate::storage::StorageBackend;

use super::{bundle, codec, decode_envelope, encode_envelope, Snapshot, SnapshotMode};

/// A finished export, ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub mode: SnapshotMode,
    /// The JSON document, or the base64 text of the archive.
    pub data: String,
    pub filename: String,
    pub counts: BTreeMap<String, usize>,
    pub assets: usize,
}

impl ExportArtifact {
    /// Bytes to write to a file named [`ExportArtifact::filename`].
    pub fn file_bytes(&self) -> AppResult<Vec<u8>> {
        match self.mode {
            SnapshotMode::Json => Ok(self.data.as_bytes().to_vec()),
            SnapshotMode::Archive => decode_envelope(&self.data),
        }
    }
}

pub fn artifact_filename(mode: SnapshotMode) -> String {
    format!(
        "inventory-backup-{}.{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        mode.extension()
    )
}

#[derive(Clone)]
pub struct SnapshotWriter {
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
}

impl SnapshotWriter {
    pub fn new(pool: SqlitePool, storage: Arc<dyn StorageBackend>) -> Self {
        Self { pool, storage }
    }

    /// Reads every entity kind. Tables are read one after another without a
    /// transaction, so writes landing mid-export may be partially visible.
    pub async fn read_graph(&self) -> AppResult<Snapshot> {
        let unavailable =
            |e: sqlx::Error| AppError::StoreUnavailable(format!("Failed to read store: {}", e));

        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        let mut snapshot = Snapshot::new();
        for kind in EntityKind::write_order() {
            let records = store::read_all(&mut *conn, kind)
                .await
                .map_err(unavailable)?;
            snapshot.insert_table(kind, records);
        }
        Ok(snapshot)
    }

    pub async fn export_lightweight(&self) -> AppResult<ExportArtifact> {
        let snapshot = self.read_graph().await?;
        let data = codec::encode(&snapshot)?;
        let counts = snapshot.counts();

        tracing::info!(
            "Lightweight export: {} rows, {} bytes",
            counts.values().sum::<usize>(),
            data.len()
        );

        Ok(ExportArtifact {
            mode: SnapshotMode::Json,
            data,
            filename: artifact_filename(SnapshotMode::Json),
            counts,
            assets: 0,
        })
    }

    pub async fn export_full(&self) -> AppResult<ExportArtifact> {
        let snapshot = self.read_graph().await?;
        let payload = codec::encode(&snapshot)?;
        let assets = bundle::gather_assets(&snapshot, self.storage.as_ref()).await?;
        let asset_count = assets.len();

        let archive = tokio::task::spawn_blocking(move || bundle::pack(&payload, &assets))
            .await
            .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))??;
        let counts = snapshot.counts();

        tracing::info!(
            "Full export: {} rows, {} assets, {} bytes",
            counts.values().sum::<usize>(),
            asset_count,
            archive.len()
        );

        Ok(ExportArtifact {
            mode: SnapshotMode::Archive,
            data: encode_envelope(&archive),
            filename: artifact_filename(SnapshotMode::Archive),
            counts,
            assets: asset_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::storage::LocalBackend;

    #[test]
    fn test_artifact_filename() {
        let name = artifact_filename(SnapshotMode::Archive);
        assert!(name.starts_with("inventory-backup-"));
        assert!(name.ends_with(".zip"));
        // inventory-backup-YYYYMMDD-HHMMSS.zip
        assert_eq!(name.len(), "inventory-backup-".len() + 15 + ".zip".len());
    }

    #[tokio::test]
    async fn test_lightweight_export_covers_every_kind() {
        let (dir, pool) = testing::pool().await;
        let mut conn = pool.acquire().await.unwrap();
        store::upsert(&mut conn, &testing::location("L1", "Shelf A", None)).await.unwrap();
        store::upsert(&mut conn, &testing::item("I1", "Drill", Some("L1"))).await.unwrap();
        drop(conn);

        let writer = SnapshotWriter::new(pool, Arc::new(LocalBackend::new(dir.path().join("public"))));
        let artifact = writer.export_lightweight().await.unwrap();

        assert_eq!(artifact.mode, SnapshotMode::Json);
        assert!(artifact.filename.ends_with(".json"));
        assert_eq!(artifact.counts.len(), EntityKind::ALL.len());
        assert_eq!(artifact.counts["locations"], 1);
        assert_eq!(artifact.counts["items"], 1);

        let decoded = codec::decode(&artifact.data).unwrap();
        assert_eq!(decoded, writer.read_graph().await.unwrap());
    }

    #[tokio::test]
    async fn test_full_export_bundles_local_images() {
        let (dir, pool) = testing::pool().await;
        let storage = Arc::new(LocalBackend::new(dir.path().join("public")));
        storage
            .upload("uploads/camera.jpg", b"jpeg bytes", "image/jpeg")
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        store::upsert(&mut conn, &testing::item_with_image("I1", "/uploads/camera.jpg"))
            .await
            .unwrap();
        drop(conn);

        let writer = SnapshotWriter::new(pool, storage);
        let artifact = writer.export_full().await.unwrap();
        assert_eq!(artifact.assets, 1);

        let staging = tempfile::tempdir().unwrap();
        let unpacked = bundle::unpack(&artifact.file_bytes().unwrap(), staging.path()).unwrap();
        assert_eq!(unpacked.staged, vec!["uploads/camera.jpg".to_string()]);
        assert_eq!(codec::decode(&unpacked.payload).unwrap().table(EntityKind::Item).len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let (dir, pool) = testing::pool().await;
        pool.close().await;

        let writer = SnapshotWriter::new(pool, Arc::new(LocalBackend::new(dir.path())));
        let err = writer.export_lightweight().await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
    }
}
