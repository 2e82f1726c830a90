//! Relational snapshot backup and restore.
//!
//! A [`Snapshot`] is the flat, entity-keyed view of the whole dataset. The
//! [`codec`] turns it into the portable JSON document and back, the
//! [`bundle`] packs that document together with item images into a ZIP
//! archive, [`writer`] produces both export artifacts and [`loader`] runs an
//! import through the transactional [`restore`] engine.

pub mod bundle;
pub mod codec;
pub mod loader;
pub mod restore;
pub mod writer;

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{EntityKind, Record};

pub use loader::{RestoreRequest, SnapshotLoader};
pub use restore::{Operator, RestoreOptions};
pub use writer::{ExportArtifact, SnapshotWriter};

/// Candidate or live entity graph, one ordered table per entity kind.
///
/// A kind that has a table (even an empty one) is *covered*: a wiping restore
/// clears it. Kinds without a table are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    tables: BTreeMap<EntityKind, Vec<Record>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, kind: EntityKind, records: Vec<Record>) {
        self.tables.insert(kind, records);
    }

    pub fn table(&self, kind: EntityKind) -> &[Record] {
        self.tables.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn covers(&self, kind: EntityKind) -> bool {
        self.tables.contains_key(&kind)
    }

    pub fn covered(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.tables.keys().copied()
    }

    /// Record count per payload key for every covered kind.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.tables
            .iter()
            .map(|(kind, records)| (kind.key().to_string(), records.len()))
            .collect()
    }

    /// Local image references of every item, deduplicated, in table order.
    pub fn image_references(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.table(EntityKind::Item)
            .iter()
            .filter_map(|item| item.text("image"))
            .filter(|reference| seen.insert(*reference))
            .collect()
    }
}

/// How an artifact is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Structured JSON document only.
    Json,
    /// ZIP archive bundling the document with item images.
    Archive,
}

impl SnapshotMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotMode::Json => "json",
            SnapshotMode::Archive => "archive",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SnapshotMode::Json => "json",
            SnapshotMode::Archive => "zip",
        }
    }
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub mode: Option<SnapshotMode>,
    /// Payload keys of the kinds that were wiped before writing.
    pub wiped: Vec<String>,
    /// Rows written per payload key.
    pub written: BTreeMap<String, usize>,
    pub skipped_users: usize,
    pub assets_restored: usize,
    pub assets_ignored: usize,
}

impl RestoreSummary {
    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}

/// Base64 text form of an archive, as carried across the action boundary.
pub fn encode_envelope(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes archive text produced by [`encode_envelope`]. A `data:` URL
/// prefix and surrounding whitespace are tolerated.
pub fn decode_envelope(text: &str) -> AppResult<Vec<u8>> {
    let text = text.trim();
    let body = match text.split_once(";base64,") {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => text,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| AppError::CorruptPayload(format!("archive is not valid base64: {}", e)))
}
