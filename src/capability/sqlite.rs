// SPDX-License-Identifier: MIT

//! SQLite-backed record persistence

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{check_primary_key, Persistence, PersistenceError, Record};

/// Stores each collection in its own table, created on first write.
///
/// Columns are untyped and added as new record keys show up. Booleans are
/// stored as integers, nested values as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PersistenceError::Database(format!("Failed to create db directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        log::debug!("SQLite store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError::Database(e.to_string()))
    }
}

/// Quote a table or column name, accepting only `[A-Za-z_][A-Za-z0-9_]*`
fn quote(ident: &str) -> Result<String, PersistenceError> {
    let mut chars = ident.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{}\"", ident))
    } else {
        Err(PersistenceError::InvalidIdentifier(ident.to_string()))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

/// Create the table if needed and add any missing columns.
/// `columns[0]` is the primary key.
fn ensure_table(conn: &Connection, table: &str, columns: &[&str]) -> Result<(), PersistenceError> {
    let mut defs = vec![format!("{} NOT NULL PRIMARY KEY", quote(columns[0])?)];
    for column in &columns[1..] {
        defs.push(quote(column)?);
    }
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {} ({})", table, defs.join(", ")),
        [],
    )?;

    let existing: Vec<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        names.collect::<Result<_, _>>()?
    };

    for column in columns {
        if !existing.iter().any(|e| e == column) {
            log::debug!("Adding column {} to {}", column, table);
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {}", table, quote(column)?),
                [],
            )?;
        }
    }

    Ok(())
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        primary_key: &str,
    ) -> Result<usize, PersistenceError> {
        if records.is_empty() {
            return Ok(0);
        }
        check_primary_key(collection, records, primary_key)?;

        let table = quote(collection)?;
        let mut columns: Vec<&str> = vec![primary_key];
        for record in records {
            for key in record.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key.as_str());
                }
            }
        }
        let quoted = columns
            .iter()
            .map(|c| quote(c))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        ensure_table(&tx, &table, &columns)?;
        {
            let sql = format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                table,
                quoted.join(", "),
                placeholders.join(", ")
            );
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let values = columns
                    .iter()
                    .map(|c| record.get(*c).map(to_sql).unwrap_or(SqlValue::Null));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        log::debug!("Upserted {} record(s) into {}", records.len(), collection);
        Ok(records.len())
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Record>, PersistenceError> {
        let table = quote(collection)?;
        let conn = self.lock()?;

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [collection],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map([], |row| {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_sql(row.get_ref(i)?));
            }
            Ok(record)
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
