//! Conflict-safe bulk upsert shared by the dimension and fact loaders.

use itertools::Itertools;
use rusqlite::params_from_iter;
use tracing::{info, warn};

use super::{RowSet, Warehouse};
use crate::error::Result;

impl Warehouse {
    /// Bulk insert with update-on-conflict keyed on `key_columns`. When the
    /// target table has no matching uniqueness constraint the statement is
    /// downgraded to a plain insert, trading duplicate risk for
    /// availability. The whole batch commits or rolls back together.
    pub fn upsert(&mut self, table: &str, key_columns: &[&str], rows: &RowSet) -> Result<usize> {
        if rows.is_empty() {
            info!("No rows to upsert into {}", table);
            return Ok(0);
        }

        let column_list = rows.columns.iter().join(", ");
        let placeholders = (1..=rows.columns.len()).map(|i| format!("?{i}")).join(", ");
        let conflict_target = key_columns.join(", ");
        let update_set = rows
            .columns
            .iter()
            .filter(|c| !key_columns.contains(&c.as_str()))
            .map(|c| format!("{c} = excluded.{c}"))
            .join(", ");

        let insert_sql = format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})");
        let upsert_sql = if update_set.is_empty() {
            format!("{insert_sql} ON CONFLICT ({conflict_target}) DO NOTHING")
        } else {
            format!("{insert_sql} ON CONFLICT ({conflict_target}) DO UPDATE SET {update_set}")
        };

        let tx = self.conn.transaction()?;
        let mut plain_insert = false;
        let mut stmt = match tx.prepare(&upsert_sql) {
            Ok(stmt) => stmt,
            Err(e) if e.to_string().contains("ON CONFLICT clause does not match") => {
                warn!(
                    "No unique constraint on ({}) for {} - falling back to plain insert",
                    conflict_target, table
                );
                plain_insert = true;
                tx.prepare(&insert_sql)?
            }
            Err(e) => return Err(e.into()),
        };

        for row in &rows.rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
        drop(stmt);
        tx.commit()?;

        if plain_insert {
            info!("Inserted {} rows into {} (no upsert)", rows.len(), table);
        } else {
            info!("Upserted {} rows into {}", rows.len(), table);
        }
        Ok(rows.len())
    }
}
