//! Generic per-entity store access driven by the entity table.

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};

use crate::models::{EntityDef, EntityKind, FieldDefault, FieldType, FieldValue, Record};

fn quoted(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn column_list(def: &EntityDef) -> String {
    def.columns().map(quoted).collect::<Vec<_>>().join(", ")
}

fn decode_row(kind: EntityKind, row: &SqliteRow) -> Result<Record, sqlx::Error> {
    let def = kind.def();
    let mut values = Vec::with_capacity(def.fields.len());
    for (i, field) in def.fields.iter().enumerate() {
        let value = match field.ty {
            FieldType::Integer => row
                .try_get::<Option<i64>, _>(i)?
                .map_or(FieldValue::Null, FieldValue::Integer),
            FieldType::Text | FieldType::Decimal | FieldType::Timestamp | FieldType::Document => row
                .try_get::<Option<String>, _>(i)?
                .map_or(FieldValue::Null, FieldValue::Text),
        };
        values.push(value);
    }
    Ok(Record::new(kind, values))
}

/// Reads every row of `kind` in insertion order.
pub async fn read_all<'e, E>(executor: E, kind: EntityKind) -> Result<Vec<Record>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let def = kind.def();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY rowid",
        column_list(def),
        quoted(def.table)
    );
    let rows = sqlx::query(&sql).fetch_all(executor).await?;
    rows.iter().map(|row| decode_row(kind, row)).collect()
}

/// Deletes every row of `kind`, optionally sparing the row whose id is `keep_id`.
pub async fn delete_all(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    keep_id: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let table = quoted(kind.def().table);
    let result = match keep_id {
        Some(id) => {
            sqlx::query(&format!("DELETE FROM {} WHERE \"id\" <> ?", table))
                .bind(id)
                .execute(&mut *conn)
                .await?
        }
        None => {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *conn)
                .await?
        }
    };
    Ok(result.rows_affected())
}

const STAMP_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Parameters are numbered so a write-time column can reuse its value in the
/// update clause. An unset write-time column is stamped on insert and left
/// alone on conflict.
fn upsert_sql(def: &EntityDef) -> String {
    let key_position = def.upsert_position();
    let table = quoted(def.table);

    let mut values = Vec::with_capacity(def.fields.len());
    let mut updates = Vec::new();
    for (i, field) in def.fields.iter().enumerate() {
        let param = format!("?{}", i + 1);
        let column = quoted(field.column);
        if field.default == FieldDefault::Now {
            values.push(format!("COALESCE({}, {})", param, STAMP_NOW));
            if i != key_position {
                updates.push(format!("{} = COALESCE({}, {}.{})", column, param, table, column));
            }
        } else {
            values.push(param);
            if i != key_position {
                updates.push(format!("{0} = excluded.{0}", column));
            }
        }
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        table,
        column_list(def),
        values.join(", "),
        quoted(def.fields[key_position].column),
        updates.join(", ")
    )
}

/// Inserts `record`, or updates the row sharing its upsert key.
pub async fn upsert(conn: &mut SqliteConnection, record: &Record) -> Result<(), sqlx::Error> {
    let sql = upsert_sql(record.def());
    let mut query = sqlx::query(&sql);
    for value in &record.values {
        query = match value {
            FieldValue::Null => query.bind(None::<String>),
            FieldValue::Text(s) => query.bind(s.as_str()),
            FieldValue::Integer(n) => query.bind(*n),
        };
    }
    query.execute(&mut *conn).await?;
    Ok(())
}
