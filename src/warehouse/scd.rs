//! Slowly-changing-dimension (Type 2) history management.
//!
//! Per business key a dimension row moves absent -> current -> expired;
//! only one version is ever current. Changed keys expire the old version
//! and insert the new one under a savepoint so a partial pair can never be
//! committed.

use std::collections::{HashMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use tracing::{info, warn};

use super::{opt_text, timestamp_now, RowSet, Warehouse, OPEN_END};
use crate::dataset::{normalize_key, Customer, Product};
use crate::error::Result;

/// How one dimension table tracks history. `tracked` names the attribute
/// columns, in the order [`DimRecord::attributes`] carries their values.
pub struct DimensionSpec {
    pub table: &'static str,
    pub business_key: &'static str,
    pub tracked: &'static [&'static str],
}

pub const PRODUCT_DIMENSION: DimensionSpec = DimensionSpec {
    table: "dim_product",
    business_key: "product_name",
    tracked: &["category", "price", "carbon_footprint_rating"],
};

pub const CUSTOMER_DIMENSION: DimensionSpec = DimensionSpec {
    table: "dim_customer",
    business_key: "email",
    tracked: &["customer_name", "loyalty_level", "join_date"],
};

/// One incoming dimension member.
#[derive(Debug, Clone)]
pub struct DimRecord {
    pub business_key: Option<String>,
    pub attributes: Vec<Value>,
}

impl From<&Product> for DimRecord {
    fn from(product: &Product) -> Self {
        Self {
            business_key: product.product_name.clone(),
            attributes: vec![
                opt_text(product.category.clone()),
                product.price.map(Value::Real).unwrap_or(Value::Null),
                product
                    .carbon_footprint_rating
                    .map(Value::Integer)
                    .unwrap_or(Value::Null),
            ],
        }
    }
}

impl From<&Customer> for DimRecord {
    fn from(customer: &Customer) -> Self {
        Self {
            business_key: customer.email.clone(),
            attributes: vec![
                opt_text(customer.customer_name.clone()),
                opt_text(customer.loyalty_level.clone()),
                opt_text(customer.join_date.map(|d| d.format("%Y-%m-%d").to_string())),
            ],
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScdStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub dropped: usize,
}

impl Warehouse {
    /// Apply one incoming batch to a dimension with SCD Type 2 semantics.
    pub fn load_dimension(
        &mut self,
        spec: &DimensionSpec,
        incoming: Vec<DimRecord>,
    ) -> Result<ScdStats> {
        let mut stats = ScdStats::default();
        if incoming.is_empty() {
            info!("No new data for {}", spec.table);
            return Ok(stats);
        }
        info!("SCD Type 2 for {} - {} incoming rows", spec.table, incoming.len());

        // Validate business keys, then deduplicate on the normalized key
        // keeping the first occurrence.
        let mut seen = HashSet::new();
        let mut candidates: Vec<(String, String, Vec<Value>)> = Vec::new();
        for record in incoming {
            let Some(raw) = valid_business_key(record.business_key.as_deref()) else {
                stats.dropped += 1;
                continue;
            };
            let normalized = normalize_key(&raw);
            if seen.insert(normalized.clone()) {
                candidates.push((normalized, raw, record.attributes));
            }
        }
        if stats.dropped > 0 {
            warn!(
                "Dropping {} rows with invalid or missing {} for {}",
                stats.dropped, spec.business_key, spec.table
            );
        }
        if candidates.is_empty() {
            info!("No valid rows left for {} after key cleaning", spec.table);
            return Ok(stats);
        }

        let active = self.active_rows(spec)?;
        let now = timestamp_now();

        let mut insert_columns: Vec<&str> = vec![spec.business_key];
        insert_columns.extend_from_slice(spec.tracked);
        insert_columns.extend_from_slice(&["effective_start", "effective_end", "is_current"]);

        let mut new_rows = RowSet::new(&insert_columns);
        let mut changed: Vec<(String, Vec<Value>)> = Vec::new();
        for (normalized, raw, attributes) in candidates {
            match active.get(&normalized) {
                None => new_rows.push(version_row(&raw, &attributes, &now)),
                Some(current) if attributes_differ(&attributes, current) => {
                    changed.push((raw, attributes));
                }
                Some(_) => stats.unchanged += 1,
            }
        }

        // New keys go through the shared upsert engine; dimension tables
        // carry no business-key uniqueness constraint, so the engine takes
        // its logged plain-insert path.
        if !new_rows.is_empty() {
            info!("Inserting {} new records into {}", new_rows.len(), spec.table);
            stats.inserted = self.upsert(spec.table, &[spec.business_key], &new_rows)?;
        }

        if !changed.is_empty() {
            info!("Updating {} changed records in {}", changed.len(), spec.table);
            stats.updated = self.expire_and_insert(spec, &insert_columns, changed, &now)?;
        }

        info!(
            "SCD Type 2 complete for {}: {} new, {} changed, {} unchanged",
            spec.table, stats.inserted, stats.updated, stats.unchanged
        );
        Ok(stats)
    }

    /// Expire the active version and insert its successor, one savepoint per
    /// business key. A duplicate-insert race rolls back just that key; any
    /// other failure aborts the batch.
    fn expire_and_insert(
        &mut self,
        spec: &DimensionSpec,
        insert_columns: &[&str],
        changed: Vec<(String, Vec<Value>)>,
        now: &str,
    ) -> Result<usize> {
        let expire_sql = format!(
            "UPDATE {} SET is_current = 0, effective_end = ?1 \
             WHERE lower(trim({})) = ?2 AND is_current = 1",
            spec.table, spec.business_key
        );
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.table,
            insert_columns.join(", "),
            (1..=insert_columns.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut applied = 0;
        let mut tx = self.conn.transaction()?;
        for (raw, attributes) in changed {
            let mut sp = tx.savepoint()?;
            sp.execute(&expire_sql, params![now, normalize_key(&raw)])?;
            let row = version_row(&raw, &attributes, now);
            match sp.execute(&insert_sql, params_from_iter(row.iter())) {
                Ok(_) => {
                    sp.commit()?;
                    applied += 1;
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    warn!("Duplicate insert attempt for '{}' in {} - skipping", raw, spec.table);
                    sp.rollback()?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    /// All currently-active rows keyed by normalized business key, with
    /// attribute values in `tracked` order.
    fn active_rows(&self, spec: &DimensionSpec) -> Result<HashMap<String, Vec<Value>>> {
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE is_current = 1",
            spec.business_key,
            spec.tracked.join(", "),
            spec.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut active = HashMap::new();
        while let Some(row) = rows.next()? {
            let Some(key) = row.get::<_, Option<String>>(0)? else {
                continue;
            };
            let mut values = Vec::with_capacity(spec.tracked.len());
            for i in 0..spec.tracked.len() {
                values.push(row.get::<_, Value>(i + 1)?);
            }
            active.insert(normalize_key(&key), values);
        }
        Ok(active)
    }
}

/// A business key is usable once trimmed unless it is empty or a textual
/// null sentinel left over from upstream tooling.
fn valid_business_key(key: Option<&str>) -> Option<String> {
    let trimmed = key?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "nan" || lowered == "nat" {
        return None;
    }
    Some(trimmed.to_string())
}

fn version_row(business_key: &str, attributes: &[Value], now: &str) -> Vec<Value> {
    let mut row = Vec::with_capacity(attributes.len() + 4);
    row.push(Value::Text(business_key.to_string()));
    row.extend(attributes.iter().cloned());
    row.push(Value::Text(now.to_string()));
    row.push(Value::Text(OPEN_END.to_string()));
    row.push(Value::Integer(1));
    row
}

fn attributes_differ(incoming: &[Value], active: &[Value]) -> bool {
    incoming.len() != active.len()
        || incoming
            .iter()
            .zip(active)
            .any(|(a, b)| values_differ(a, b))
}

/// Attribute comparison across SQLite's dynamic types: integers and reals
/// compare numerically, everything else by variant equality.
fn values_differ(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => false,
        (Value::Integer(x), Value::Integer(y)) => x != y,
        (Value::Real(x), Value::Real(y)) => (x - y).abs() > 1e-9,
        (Value::Integer(x), Value::Real(y)) | (Value::Real(y), Value::Integer(x)) => {
            (*x as f64 - y).abs() > 1e-9
        }
        (Value::Text(x), Value::Text(y)) => x != y,
        (Value::Blob(x), Value::Blob(y)) => x != y,
        _ => true,
    }
}
