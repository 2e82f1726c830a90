//! Transactional restore engine.
//!
//! [`apply`] runs inside a transaction owned by the caller and never commits
//! it. Referential checks run against the *merged view* of every table (the
//! rows that will exist once the restore lands: surviving store rows
//! overlaid by snapshot rows on their upsert key) before anything is
//! deleted, so a rejected snapshot never touches the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use sqlx::SqliteConnection;

use crate::db::store;
use crate::error::{AppError, AppResult};
use crate::models::{EntityKind, Record};

use super::Snapshot;

const MAX_REPORTED: usize = 5;

/// The authenticated user performing a restore. Their own account row is
/// never deleted or overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub user_id: String,
    pub username: String,
}

impl Operator {
    fn owns(&self, user: &Record) -> bool {
        user.id() == Some(self.user_id.as_str())
            || user.text("username") == Some(self.username.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub wipe_first: bool,
    pub operator: Option<Operator>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub wiped: Vec<EntityKind>,
    pub written: BTreeMap<String, usize>,
    pub skipped_users: usize,
}

/// Kinds cleared by a wiping restore: every covered kind plus every kind
/// whose rows cannot exist without a parent in the set.
pub fn wipe_set(snapshot: &Snapshot) -> BTreeSet<EntityKind> {
    let mut set: BTreeSet<EntityKind> = snapshot.covered().collect();
    let mut pending: Vec<EntityKind> = set.iter().copied().collect();
    while let Some(kind) = pending.pop() {
        for dependent in kind.dependents() {
            let bound = dependent
                .def()
                .foreign_keys()
                .any(|(_, field, target)| target == kind && field.required);
            if bound && set.insert(dependent) {
                pending.push(dependent);
            }
        }
    }
    set
}

/// Rows of one kind as they will exist after the restore.
struct MergedTable {
    rows: Vec<Record>,
    by_key: HashMap<String, usize>,
}

impl MergedTable {
    fn new(existing: Vec<Record>) -> Self {
        let by_key = existing
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.upsert_key().map(|k| (k, i)))
            .collect();
        Self {
            rows: existing,
            by_key,
        }
    }

    fn overlay(&mut self, record: &Record) {
        let Some(key) = record.upsert_key() else {
            return;
        };
        match self.by_key.get(&key) {
            Some(&i) => self.rows[i] = record.clone(),
            None => {
                self.by_key.insert(key, self.rows.len());
                self.rows.push(record.clone());
            }
        }
    }

    fn ids(&self) -> HashSet<&str> {
        self.rows.iter().filter_map(Record::id).collect()
    }
}

/// Writes `snapshot` through `conn`, which must be inside an open transaction.
pub async fn apply(
    conn: &mut SqliteConnection,
    snapshot: &Snapshot,
    options: &RestoreOptions,
) -> AppResult<Applied> {
    // Surviving children may point at parents that are deleted and then
    // re-inserted, so integrity is checked once at commit.
    sqlx::query("PRAGMA defer_foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    let wiped = if options.wipe_first {
        wipe_set(snapshot)
    } else {
        BTreeSet::new()
    };

    let mut skipped_users = 0;
    let mut tables: BTreeMap<EntityKind, Vec<&Record>> = BTreeMap::new();
    for kind in snapshot.covered() {
        let records = snapshot
            .table(kind)
            .iter()
            .filter(|record| match (&options.operator, kind) {
                (Some(operator), EntityKind::User) if operator.owns(record) => {
                    skipped_users += 1;
                    false
                }
                _ => true,
            })
            .collect();
        tables.insert(kind, records);
    }
    if skipped_users > 0 {
        tracing::info!("Restore skips the operator's own account row");
    }

    let merged = merged_view(conn, &tables, &wiped, options.operator.as_ref()).await?;
    check_unique(&merged)?;
    check_references(&merged)?;
    check_location_cycles(&merged[&EntityKind::Location])?;

    for kind in EntityKind::wipe_order() {
        if !wiped.contains(&kind) {
            continue;
        }
        let keep = match (kind, &options.operator) {
            (EntityKind::User, Some(operator)) => Some(operator.user_id.as_str()),
            _ => None,
        };
        let deleted = store::delete_all(conn, kind, keep).await?;
        tracing::debug!("Wiped {} rows from {}", deleted, kind);
    }

    let mut written = BTreeMap::new();
    for kind in EntityKind::write_order() {
        let Some(records) = tables.get(&kind) else {
            continue;
        };
        let ordered = if kind == EntityKind::Location {
            order_locations(records)
        } else {
            records.clone()
        };
        for record in &ordered {
            store::upsert(conn, record).await?;
        }
        written.insert(kind.key().to_string(), ordered.len());
    }

    Ok(Applied {
        wiped: wiped.into_iter().collect(),
        written,
        skipped_users,
    })
}

async fn merged_view(
    conn: &mut SqliteConnection,
    tables: &BTreeMap<EntityKind, Vec<&Record>>,
    wiped: &BTreeSet<EntityKind>,
    operator: Option<&Operator>,
) -> AppResult<BTreeMap<EntityKind, MergedTable>> {
    let mut merged = BTreeMap::new();
    for kind in EntityKind::ALL {
        let mut existing = store::read_all(&mut *conn, kind).await?;
        if wiped.contains(&kind) {
            existing.retain(|row| {
                kind == EntityKind::User && operator.is_some_and(|op| row.id() == Some(op.user_id.as_str()))
            });
        }
        let mut table = MergedTable::new(existing);
        for record in tables.get(&kind).into_iter().flatten() {
            table.overlay(record);
        }
        merged.insert(kind, table);
    }
    Ok(merged)
}

fn check_unique(merged: &BTreeMap<EntityKind, MergedTable>) -> AppResult<()> {
    for (kind, table) in merged {
        for (position, field) in kind.def().fields.iter().enumerate() {
            if !field.unique {
                continue;
            }
            let mut seen = HashSet::new();
            for row in &table.rows {
                if let Some(value) = row.values[position].key_text() {
                    if !seen.insert(value.clone()) {
                        return Err(AppError::UniqueConflict(format!(
                            "{} {} '{}' would belong to two rows after restore",
                            kind, field.name, value
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_references(merged: &BTreeMap<EntityKind, MergedTable>) -> AppResult<()> {
    let ids: BTreeMap<EntityKind, HashSet<&str>> = merged
        .iter()
        .map(|(kind, table)| (*kind, table.ids()))
        .collect();

    let mut violations = Vec::new();
    for (kind, table) in merged {
        for (position, field, target) in kind.def().foreign_keys() {
            for row in &table.rows {
                let Some(value) = row.values[position].as_str() else {
                    continue;
                };
                if !ids[&target].contains(value) {
                    violations.push(format!(
                        "{} '{}'.{} -> {} '{}'",
                        kind,
                        row.id().unwrap_or("?"),
                        field.name,
                        target,
                        value
                    ));
                }
            }
        }
    }

    if violations.is_empty() {
        return Ok(());
    }
    let total = violations.len();
    violations.truncate(MAX_REPORTED);
    let mut message = violations.join("; ");
    if total > MAX_REPORTED {
        message.push_str(&format!(" (and {} more)", total - MAX_REPORTED));
    }
    Err(AppError::DanglingForeignKey(format!(
        "{} (parent is in neither the snapshot nor the store)",
        message
    )))
}

fn check_location_cycles(locations: &MergedTable) -> AppResult<()> {
    let parents: HashMap<&str, Option<&str>> = locations
        .rows
        .iter()
        .filter_map(|row| row.id().map(|id| (id, row.text("parentId"))))
        .collect();

    let mut done: HashSet<&str> = HashSet::new();
    for &start in parents.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if done.contains(id) {
                break;
            }
            if path.contains(&id) {
                return Err(AppError::SchemaMismatch(format!(
                    "location hierarchy contains a cycle through '{}'",
                    id
                )));
            }
            path.push(id);
            current = parents.get(id).copied().flatten();
        }
        done.extend(path);
    }
    Ok(())
}

/// Orders locations so every parent present in the snapshot precedes its
/// children. Input must be acyclic.
fn order_locations<'a>(records: &[&'a Record]) -> Vec<&'a Record> {
    let by_id: HashMap<&str, &Record> = records
        .iter()
        .filter_map(|r| r.id().map(|id| (id, *r)))
        .collect();

    let depth = |record: &Record| {
        let mut depth = 0;
        let mut parent = record.text("parentId");
        while let Some(next) = parent.and_then(|id| by_id.get(id)) {
            depth += 1;
            if depth > records.len() {
                break;
            }
            parent = next.text("parentId");
        }
        depth
    };

    let mut ordered = records.to_vec();
    ordered.sort_by_cached_key(|record| depth(record));
    ordered
}
