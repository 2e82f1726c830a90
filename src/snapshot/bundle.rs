//! ZIP bundling of the snapshot document with item images.
//!
//! Entry names are the image references with the leading `/` removed, which
//! are also the asset store keys, so restored item rows point at restored
//! files without rewriting.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{AppError, AppResult};
use crate::storage::{is_safe_key, StorageBackend};

use super::Snapshot;

/// Archive entry holding the JSON document.
pub const PAYLOAD_ENTRY: &str = "backup.json";

const REMOTE_PREFIXES: &[&str] = &["http://", "https://", "//", "data:", "blob:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// Result of unpacking an archive into a staging directory.
#[derive(Debug)]
pub struct Unpacked {
    pub payload: String,
    /// Keys of the assets written under the staging directory.
    pub staged: Vec<String>,
}

/// Asset key for a locally stored image reference.
///
/// Returns `None` for empty references and for remote ones, which this
/// system does not own.
pub fn asset_key(reference: &str) -> Option<&str> {
    let reference = reference.trim();
    let lower = reference.to_ascii_lowercase();
    if reference.is_empty() || REMOTE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return None;
    }
    Some(reference.trim_start_matches('/'))
}

/// Reads every locally stored image referenced by the snapshot's items.
pub async fn gather_assets(
    snapshot: &Snapshot,
    storage: &dyn StorageBackend,
) -> AppResult<Vec<Asset>> {
    let mut assets = Vec::new();
    for reference in snapshot.image_references() {
        let Some(key) = asset_key(reference) else {
            continue;
        };
        if !is_safe_key(key) {
            tracing::warn!("Skipping image with unsafe reference: {}", reference);
            continue;
        }
        if assets.iter().any(|a: &Asset| a.key == key) {
            continue;
        }
        if !storage.exists(key).await? {
            tracing::warn!("Skipping missing image: {} (in {})", key, storage.location());
            continue;
        }
        let bytes = storage.download(key).await?;
        assets.push(Asset {
            key: key.to_string(),
            bytes,
        });
    }
    Ok(assets)
}

/// Builds the archive bytes. The document is deflated; images are stored
/// as-is since they are already compressed.
pub fn pack(payload: &str, assets: &[Asset]) -> AppResult<Vec<u8>> {
    let zip_err = |e: zip::result::ZipError| AppError::Internal(format!("Failed to build archive: {}", e));
    let io_err = |e: std::io::Error| AppError::Internal(format!("Failed to write archive: {}", e));

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file(PAYLOAD_ENTRY, deflated).map_err(zip_err)?;
        zip.write_all(payload.as_bytes()).map_err(io_err)?;

        for asset in assets {
            zip.start_file(asset.key.as_str(), stored).map_err(zip_err)?;
            zip.write_all(&asset.bytes).map_err(io_err)?;
        }

        zip.finish().map_err(zip_err)?;
    }
    Ok(cursor.into_inner())
}

/// Extracts the document and stages every asset under `staging`.
///
/// Any entry whose name is not a plain relative path rejects the whole
/// archive before it can be written.
pub fn unpack(bytes: &[u8], staging: &Path) -> AppResult<Unpacked> {
    let corrupt = |e: zip::result::ZipError| {
        AppError::CorruptPayload(format!("not a valid snapshot archive: {}", e))
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let mut payload = None;
    let mut staged = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let name = entry.name().to_string();

        let key = if entry.is_dir() {
            name.trim_end_matches('/')
        } else {
            name.as_str()
        };
        if !is_safe_key(key) || entry.enclosed_name().is_none() {
            return Err(AppError::UnsafeArchiveEntry(name));
        }
        if entry.is_dir() {
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|e| {
            AppError::CorruptPayload(format!("archive entry {} is unreadable: {}", name, e))
        })?;

        if name == PAYLOAD_ENTRY {
            let text = String::from_utf8(data).map_err(|_| {
                AppError::CorruptPayload(format!("{} is not valid UTF-8", PAYLOAD_ENTRY))
            })?;
            payload = Some(text);
            continue;
        }

        let path = staging.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("Failed to create staging dir: {}", e)))?;
        }
        std::fs::write(&path, &data)
            .map_err(|e| AppError::Storage(format!("Failed to stage {}: {}", key, e)))?;
        staged.push(name);
    }

    let payload = payload.ok_or_else(|| {
        AppError::CorruptPayload(format!("archive does not contain {}", PAYLOAD_ENTRY))
    })?;
    Ok(Unpacked { payload, staged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::models::EntityKind;
    use crate::storage::LocalBackend;

    fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_asset_key() {
        assert_eq!(asset_key("/uploads/drill.jpg"), Some("uploads/drill.jpg"));
        assert_eq!(asset_key("uploads/drill.jpg"), Some("uploads/drill.jpg"));
        assert_eq!(asset_key("https://cdn.example.com/a.jpg"), None);
        assert_eq!(asset_key("HTTP://cdn.example.com/a.jpg"), None);
        assert_eq!(asset_key("//cdn.example.com/a.jpg"), None);
        assert_eq!(asset_key("data:image/png;base64,AAAA"), None);
        assert_eq!(asset_key("  "), None);
    }

    #[test]
    fn test_pack_then_unpack_stages_assets() {
        let staging = tempfile::tempdir().unwrap();
        let assets = vec![Asset {
            key: "uploads/drill.jpg".to_string(),
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
        }];

        let archive = pack("{\"items\": []}", &assets).unwrap();
        let unpacked = unpack(&archive, staging.path()).unwrap();

        assert_eq!(unpacked.payload, "{\"items\": []}");
        assert_eq!(unpacked.staged, vec!["uploads/drill.jpg".to_string()]);
        assert_eq!(
            std::fs::read(staging.path().join("uploads/drill.jpg")).unwrap(),
            vec![0xff, 0xd8, 0xff, 0xe0]
        );
    }

    #[test]
    fn test_traversal_entries_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("restore").join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let archive = raw_archive(&[
            ("uploads/ok.png", b"fine"),
            ("../../etc/passwd", b"root:x:0:0"),
            (PAYLOAD_ENTRY, b"{}"),
        ]);

        let err = unpack(&archive, &staging).unwrap_err();
        assert!(matches!(err, AppError::UnsafeArchiveEntry(name) if name == "../../etc/passwd"));
        assert!(!root.path().join("etc").exists());
    }

    #[test]
    fn test_absolute_entries_are_rejected() {
        let staging = tempfile::tempdir().unwrap();
        let archive = raw_archive(&[(PAYLOAD_ENTRY, b"{}"), ("/etc/passwd", b"x")]);

        let err = unpack(&archive, staging.path()).unwrap_err();
        assert!(matches!(err, AppError::UnsafeArchiveEntry(_)));
    }

    #[test]
    fn test_garbage_and_missing_payload_are_corrupt() {
        let staging = tempfile::tempdir().unwrap();

        let err = unpack(b"definitely not a zip", staging.path()).unwrap_err();
        assert!(matches!(err, AppError::CorruptPayload(_)));

        let archive = raw_archive(&[("uploads/a.png", b"png")]);
        let err = unpack(&archive, staging.path()).unwrap_err();
        assert!(matches!(err, AppError::CorruptPayload(msg) if msg.contains(PAYLOAD_ENTRY)));
    }

    #[tokio::test]
    async fn test_gather_assets_skips_remote_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBackend::new(dir.path());
        storage
            .upload("uploads/camera.jpg", b"camera", "image/jpeg")
            .await
            .unwrap();

        let mut snapshot = Snapshot::new();
        snapshot.insert_table(
            EntityKind::Item,
            vec![
                testing::item_with_image("I1", "/uploads/camera.jpg"),
                testing::item_with_image("I2", "/uploads/camera.jpg"),
                testing::item_with_image("I3", "https://example.com/remote.jpg"),
                testing::item_with_image("I4", "/uploads/missing.jpg"),
                testing::item_with_image("I5", "/uploads/../../secret"),
            ],
        );

        let assets = gather_assets(&snapshot, &storage).await.unwrap();
        assert_eq!(
            assets,
            vec![Asset {
                key: "uploads/camera.jpg".to_string(),
                bytes: b"camera".to_vec(),
            }]
        );
    }
}
