//! Durable item storage for tally.
//!
//! Provides a SQLite-backed [`ItemStore`] using `rusqlite`. The in-memory
//! [`RecordStore`](tally_core::RecordStore) holds the working set; this crate
//! only persists what the store has accepted and hands it back on startup.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Share it behind a `Mutex` or open one per thread.
//!
//! # Schema
//!
//! One table per item kind (`records`, `settings`). Each row keeps the key and
//! both reconciliation clocks as columns, and the full normalized item as a
//! JSON `data` column. Unknown fields in `data` are ignored on read, so items
//! may grow fields without a migration.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{ItemStore, StoredItem};
use thiserror::Error;
use tracing::debug;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored item could not be encoded or decoded.
    #[error("invalid item data in {table} for {key}: {source}")]
    InvalidData {
        table: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database, destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- data: normalized item as JSON
            -- st: authority sequence time, 0 while unconfirmed
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                mt INTEGER NOT NULL,
                st REAL NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                mt INTEGER NOT NULL,
                st REAL NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn query_items<T: StoredItem>(&self, sql: &str) -> Result<Vec<T>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut items = Vec::new();
        for row in rows {
            let (key, data) = row?;
            items.push(decode::<T>(&key, &data)?);
        }
        Ok(items)
    }
}

impl ItemStore for Database {
    type Error = DbError;

    fn select<T, F>(&self, predicate: F) -> Result<Vec<T>, DbError>
    where
        T: StoredItem,
        F: Fn(&T) -> bool,
    {
        let items: Vec<T> =
            self.query_items(&format!("SELECT key, data FROM {} ORDER BY key ASC", T::TABLE))?;
        Ok(items.into_iter().filter(|item| predicate(item)).collect())
    }

    fn select_one<T: StoredItem>(&self, key: &str) -> Result<Option<T>, DbError> {
        let data: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT data FROM {} WHERE key = ?", T::TABLE),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| decode(key, &data)).transpose()
    }

    fn put<T: StoredItem>(&mut self, item: &T) -> Result<(), DbError> {
        upsert(&self.conn, item)
    }

    fn remove<T: StoredItem>(&mut self, key: &str) -> Result<bool, DbError> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE key = ?", T::TABLE), [key])?;
        Ok(removed > 0)
    }

    fn clear(&mut self) -> Result<(), DbError> {
        self.conn
            .execute_batch("DELETE FROM records; DELETE FROM settings;")?;
        debug!("cleared item tables");
        Ok(())
    }

    /// Writes the whole batch in one transaction.
    fn put_all<T: StoredItem>(&mut self, items: &[T]) -> Result<(), DbError> {
        if items.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for item in items {
            upsert(&tx, item)?;
        }
        tx.commit()?;
        debug!(table = T::TABLE, count = items.len(), "stored items");
        Ok(())
    }
}

fn upsert<T: StoredItem>(conn: &Connection, item: &T) -> Result<(), DbError> {
    let data = serde_json::to_string(item).map_err(|source| DbError::InvalidData {
        table: T::TABLE,
        key: item.key().to_string(),
        source,
    })?;
    conn.execute(
        &format!(
            "
            INSERT INTO {} (key, mt, st, data) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET mt = excluded.mt, st = excluded.st, data = excluded.data
            ",
            T::TABLE
        ),
        params![item.key(), item.mt(), item.st(), data],
    )?;
    Ok(())
}

fn decode<T: StoredItem>(key: &str, data: &str) -> Result<T, DbError> {
    serde_json::from_str(data).map_err(|source| DbError::InvalidData {
        table: T::TABLE,
        key: key.to_string(),
        source,
    })
}
