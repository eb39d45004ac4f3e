//! Data-quality metrics and run metadata records.

use std::collections::HashSet;

use rusqlite::params;
use tracing::info;
use uuid::Uuid;

use super::{timestamp_now, Warehouse};
use crate::dataset::{Customer, Product, Sale, TransformedBatch};
use crate::error::Result;

pub const STATUS_PASS: &str = "PASS";
pub const STATUS_WARNING: &str = "WARNING";
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// Marker row appended to the quality log when a run aborts.
pub const FAILURE_MARKER: &str = "PIPELINE_ERROR";

/// Per-dataset quality counters captured after transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityRecord {
    pub table_name: String,
    pub total_rows: usize,
    pub null_counts: usize,
    pub duplicate_counts: usize,
    pub status: &'static str,
}

/// Anything the quality logger can profile: how many of its fields are null
/// and a whole-row identity for duplicate counting.
pub trait RecordProfile {
    fn null_fields(&self) -> usize;
    fn fingerprint(&self) -> String;
}

impl RecordProfile for Sale {
    fn null_fields(&self) -> usize {
        [
            self.date.is_none(),
            self.sale_timestamp.is_none(),
            self.customer_email.is_none(),
            self.city.is_none(),
        ]
        .iter()
        .filter(|n| **n)
        .count()
    }

    fn fingerprint(&self) -> String {
        format!("{:?}", self)
    }
}

impl RecordProfile for Product {
    fn null_fields(&self) -> usize {
        [
            self.product_name.is_none(),
            self.category.is_none(),
            self.price.is_none(),
            self.carbon_footprint_rating.is_none(),
        ]
        .iter()
        .filter(|n| **n)
        .count()
    }

    fn fingerprint(&self) -> String {
        format!("{:?}", self)
    }
}

impl RecordProfile for Customer {
    fn null_fields(&self) -> usize {
        [
            self.customer_name.is_none(),
            self.email.is_none(),
            self.loyalty_level.is_none(),
            self.join_date.is_none(),
        ]
        .iter()
        .filter(|n| **n)
        .count()
    }

    fn fingerprint(&self) -> String {
        format!("{:?}", self)
    }
}

/// Profile one dataset: row count, total null fields, and full-row
/// duplicates. Any null anywhere downgrades the status to WARNING.
pub fn assess<T: RecordProfile>(table_name: &str, rows: &[T]) -> QualityRecord {
    let null_counts = rows.iter().map(RecordProfile::null_fields).sum();
    let mut seen = HashSet::new();
    let duplicate_counts = rows
        .iter()
        .filter(|row| !seen.insert(row.fingerprint()))
        .count();
    QualityRecord {
        table_name: table_name.to_string(),
        total_rows: rows.len(),
        null_counts,
        duplicate_counts,
        status: if null_counts == 0 { STATUS_PASS } else { STATUS_WARNING },
    }
}

/// Profile every dataset present in the transformer's output.
pub fn assess_batch(batch: &TransformedBatch) -> Vec<QualityRecord> {
    let mut records = Vec::new();
    if let Some(sales) = &batch.sales {
        records.push(assess("sales", sales));
    }
    if let Some(products) = &batch.products {
        records.push(assess("products", products));
    }
    if let Some(customers) = &batch.customers {
        records.push(assess("customers", customers));
    }
    records
}

impl Warehouse {
    /// Append one quality row per dataset for this run.
    pub fn log_quality(&mut self, run_id: &Uuid, records: &[QualityRecord]) -> Result<()> {
        let logged_at = timestamp_now();
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO data_quality_log \
                 (run_id, table_name, total_rows, null_counts, duplicate_counts, status, logged_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id.to_string(),
                    record.table_name,
                    record.total_rows as i64,
                    record.null_counts as i64,
                    record.duplicate_counts as i64,
                    record.status,
                    logged_at,
                ],
            )?;
            info!(
                "Quality logged for {}: {} nulls found",
                record.table_name, record.null_counts
            );
        }
        tx.commit()?;
        Ok(())
    }

    /// Single FAILED marker with zero counts, appended when a run aborts.
    pub fn log_failure_marker(&mut self, run_id: &Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT INTO data_quality_log \
             (run_id, table_name, total_rows, null_counts, duplicate_counts, status, logged_at) \
             VALUES (?1, ?2, 0, 0, 0, ?3, ?4)",
            params![run_id.to_string(), FAILURE_MARKER, STATUS_FAILED, timestamp_now()],
        )?;
        Ok(())
    }

    /// One run-metadata record per run.
    pub fn log_run(&mut self, run_id: &Uuid, rows_loaded: usize, status: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO metadata_loads (run_id, load_timestamp, rows_loaded, status) \
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id.to_string(), timestamp_now(), rows_loaded as i64, status],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: Option<&str>, price: Option<f64>) -> Product {
        Product {
            product_name: name.map(|n| n.to_string()),
            category: Some("home".to_string()),
            price,
            carbon_footprint_rating: Some(2),
        }
    }

    #[test]
    fn clean_dataset_passes() {
        let rows = vec![product(Some("Bamboo Brush"), Some(4.5))];
        let record = assess("products", &rows);
        assert_eq!(record.status, STATUS_PASS);
        assert_eq!(record.null_counts, 0);
        assert_eq!(record.duplicate_counts, 0);
    }

    #[test]
    fn nulls_downgrade_to_warning_and_duplicates_are_counted() {
        let rows = vec![
            product(Some("Bamboo Brush"), None),
            product(Some("Jute Bag"), Some(3.5)),
            product(Some("Jute Bag"), Some(3.5)),
        ];
        let record = assess("products", &rows);
        assert_eq!(record.status, STATUS_WARNING);
        assert_eq!(record.null_counts, 1);
        assert_eq!(record.duplicate_counts, 1);
        assert_eq!(record.total_rows, 3);
    }

    #[test]
    fn records_land_in_the_quality_log() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        let rows = vec![product(Some("Bamboo Brush"), Some(4.5))];
        wh.log_quality(&run_id, &[assess("products", &rows)]).unwrap();
        wh.log_run(&run_id, 42, STATUS_SUCCESS).unwrap();

        let (table, status): (String, String) = wh
            .connection()
            .query_row(
                "SELECT table_name, status FROM data_quality_log WHERE run_id = ?1",
                [run_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(table, "products");
        assert_eq!(status, STATUS_PASS);

        let rows_loaded: i64 = wh
            .connection()
            .query_row(
                "SELECT rows_loaded FROM metadata_loads WHERE run_id = ?1",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows_loaded, 42);
    }

    #[test]
    fn failure_marker_has_zero_counts() {
        let mut wh = Warehouse::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();
        wh.log_failure_marker(&run_id).unwrap();

        let (table, total, status): (String, i64, String) = wh
            .connection()
            .query_row(
                "SELECT table_name, total_rows, status FROM data_quality_log",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(table, FAILURE_MARKER);
        assert_eq!(total, 0);
        assert_eq!(status, STATUS_FAILED);
    }
}
