//! SQLite-backed dimensional warehouse access.

pub mod facts;
pub mod quality;
pub mod scd;
pub mod upsert;

use std::path::Path;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Reserved surrogate id for unresolved dimension references.
pub const SENTINEL_KEY: i64 = 1;

/// Open-ended `effective_end` marker for current dimension rows.
pub const OPEN_END: &str = "infinity";

const SCHEMA: &str = include_str!("schema.sql");

/// One warehouse connection, acquired at run start and released on drop.
/// All table access goes through the loader methods on this type.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!("Warehouse opened at {}", path.display());
        Self::init(conn)
    }

    /// In-memory warehouse, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Column-named rows bound for one warehouse table.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load timestamps are stored as UTC text; the same instant is reused across
/// an expire/insert pair so history stays contiguous.
pub(crate) fn timestamp_now() -> String {
    Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub(crate) fn opt_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}
