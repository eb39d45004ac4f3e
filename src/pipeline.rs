//! End-to-end pipeline orchestration.
//!
//! Stages run strictly sequentially: extract -> transform -> quality-log ->
//! dimension loads -> fact load -> run metadata. The warehouse connection is
//! acquired at run start and released on every exit path; a failed run
//! leaves a FAILED marker behind and propagates the error to the caller.

use serde_json::Number;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::dataset::{PriceUpdate, RawTable};
use crate::error::Result;
use crate::extract;
use crate::outliers::IqrDetector;
use crate::transform;
use crate::warehouse::quality::{self, STATUS_FAILED, STATUS_SUCCESS};
use crate::warehouse::scd::{ScdStats, CUSTOMER_DIMENSION, PRODUCT_DIMENSION};
use crate::warehouse::Warehouse;

/// What one run accomplished, reported back to the scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub facts_loaded: usize,
    pub products: ScdStats,
    pub customers: ScdStats,
}

pub fn run(settings: &Settings) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    info!("===== Starting ETL run {} =====", run_id);

    let mut warehouse = Warehouse::open(&settings.warehouse_path)?;
    match execute(settings, &mut warehouse, run_id) {
        Ok(summary) => {
            info!("===== ETL run {} completed successfully =====", run_id);
            Ok(summary)
        }
        Err(e) => {
            error!("===== ETL run {} failed: {} =====", run_id, e);
            // Best effort: the marker must never mask the original error.
            if let Err(log_err) = warehouse.log_failure_marker(&run_id) {
                error!("Could not write failure marker: {}", log_err);
            }
            if let Err(log_err) = warehouse.log_run(&run_id, 0, STATUS_FAILED) {
                error!("Could not write run metadata: {}", log_err);
            }
            Err(e)
        }
    }
}

fn execute(settings: &Settings, warehouse: &mut Warehouse, run_id: Uuid) -> Result<RunSummary> {
    let mut summary = RunSummary {
        run_id,
        ..RunSummary::default()
    };

    info!("Step 1: Extracting batch data from staging");
    let mut batch = extract::extract_all(&settings.staging_dir, &settings.streaming_dir)?;

    if batch.is_empty() {
        // With no batch files at all, streamed updates become the product
        // source for this run.
        let updates = extract::extract_streaming_updates(&settings.streaming_dir);
        if updates.is_empty() {
            warn!("No batch files and no streaming updates found - nothing to load");
            warehouse.log_run(&run_id, 0, STATUS_SUCCESS)?;
            return Ok(summary);
        }
        info!("Using {} streaming updates as the products source", updates.len());
        batch.products = Some(products_from_updates(&updates));
    }

    info!("Step 2: Transforming data");
    let transformed = transform::transform_all(batch, &IqrDetector, settings.contamination);

    info!("Step 3: Tracking data quality metrics");
    let records = quality::assess_batch(&transformed);
    warehouse.log_quality(&run_id, &records)?;

    info!("Step 4: Loading dimensions with SCD Type 2");
    if let Some(products) = &transformed.products {
        summary.products =
            warehouse.load_dimension(&PRODUCT_DIMENSION, products.iter().map(Into::into).collect())?;
    }
    if let Some(customers) = &transformed.customers {
        summary.customers = warehouse
            .load_dimension(&CUSTOMER_DIMENSION, customers.iter().map(Into::into).collect())?;
    }

    info!("Step 5: Loading fact table");
    if let Some(sales) = &transformed.sales {
        summary.facts_loaded = warehouse.load_facts(sales)?;
    }

    warehouse.log_run(&run_id, summary.facts_loaded, STATUS_SUCCESS)?;
    Ok(summary)
}

/// Shape streamed overrides as a minimal products table; the streamed price
/// is the only price this run will see.
fn products_from_updates(updates: &[PriceUpdate]) -> RawTable {
    let mut table = RawTable::new(vec!["product_name".to_string(), "price".to_string()]);
    for update in updates {
        table.rows.push(vec![
            serde_json::Value::String(update.product_name.clone()),
            Number::from_f64(update.new_price)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_updates_become_a_products_table() {
        let updates = vec![
            PriceUpdate {
                product_name: "Bamboo Brush".to_string(),
                new_price: 5.25,
            },
            PriceUpdate {
                product_name: "Jute Bag".to_string(),
                new_price: 3.0,
            },
        ];
        let table = products_from_updates(&updates);
        assert_eq!(table.len(), 2);
        let price = table.column_index("price").unwrap();
        assert_eq!(table.rows[0][price], serde_json::json!(5.25));
    }
}
