//! End-to-end pipeline runs against a temp staging area and warehouse.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use eco_warehouse_etl::config::Settings;
use eco_warehouse_etl::pipeline;
use eco_warehouse_etl::warehouse::Warehouse;

const SALES_CSV: &str = "\
sale_id,date,sale_timestamp,product_name,quantity,price,customer_email,city
1,2026-08-01,2026-08-01 09:30:00,Bamboo Brush,2,4.50,thandi@example.com,Cape Town
2,2026-08-01,2026-08-01 09:31:00,Bamboo Brush,2,4.50,thandi@example.com,Cape Town
3,2026-08-01,2026-08-01 09:32:00,Bamboo Brush,2,4.50,thandi@example.com,Cape Town
4,2026-08-01,2026-08-01 09:33:00,Bamboo Brush,2,4.50,thandi@example.com,Cape Town
5,2026-08-01,2026-08-01 09:34:00,Bamboo Brush,2,4.50,thandi@example.com,Cape Town
6,2026-08-01,2026-08-01 09:35:00,Bamboo Brush,2,4.50,joe@example.com,Cape Town
7,2026-08-01,2026-08-01 09:36:00,Bamboo Brush,2,4.50,joe@example.com,Cape Town
8,2026-08-01,2026-08-01 09:37:00,Bamboo Brush,2,4.50,joe@example.com,Cape Town
9,2026-08-01,2026-08-01 09:38:00,Bamboo Brush,2,4.50,joe@example.com,Cape Town
10,2026-08-01,2026-08-01 09:39:00,Bamboo Brush,2,4.50,joe@example.com,Cape Town
555,2026-08-01,2026-08-01 10:00:00,Jute Bag,3,2.00,joe@example.com,Cape Town
555,2026-08-01,2026-08-01 10:05:00,Jute Bag,9,9.99,joe@example.com,Cape Town
11,2026-08-01,2026-08-01 10:10:00,Bamboo Brush,-5,4.50,joe@example.com,Cape Town
12,2026-08-01,2026-08-01 10:15:00,Ghost Product,1,R$ 7.25,thandi@example.com,Cape Town
13,2026-08-01,2026-08-01 10:20:00,,1,1.00,joe@example.com,Cape Town
";

const PRODUCTS_JSON: &str = r#"[
  {"name": "Bamboo Brush", "category": "home", "price": 10.0, "carbon_rating": 2},
  {"name": "Jute Bag", "category": "bags", "price": 3.5, "carbon_rating": 1}
]"#;

const CUSTOMERS_CSV: &str = "\
name,email,loyalty_level,join_date
Thandi M,thandi@example.com,gold,2024-02-29
Joe B,joe@example.com,silver,2023-01-15
";

fn test_root(tag: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("eco_etl_pipeline_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&root).unwrap();
    root
}

fn settings_for(root: &Path) -> Settings {
    Settings {
        staging_dir: root.join("staging"),
        streaming_dir: root.join("staging/streaming_updates"),
        warehouse_path: root.join("eco_warehouse.db"),
        contamination: 0.02,
    }
}

fn write_staging(settings: &Settings) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(&settings.streaming_dir)?;
    fs::write(settings.staging_dir.join("sales_2026-08-01.csv"), SALES_CSV)?;
    fs::write(settings.staging_dir.join("products_2026-08-01.json"), PRODUCTS_JSON)?;
    fs::write(settings.staging_dir.join("customers_2026-08-01.csv"), CUSTOMERS_CSV)?;
    fs::write(
        settings.streaming_dir.join("update_001.json"),
        r#"{"product_name": "Bamboo Brush", "new_price": 12.0}"#,
    )?;
    fs::write(
        settings.streaming_dir.join("update_002.json"),
        r#"{"product_name": "Ghost Product", "new_price": 9.99}"#,
    )?;
    Ok(())
}

/// Seed the calendar and location reference rows the bootstrap scripts own.
fn seed_reference_dims(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let warehouse = Warehouse::open(&settings.warehouse_path)?;
    warehouse.connection().execute_batch(
        "INSERT INTO dim_date (date, year, quarter, month, day, weekday)
             VALUES ('2026-08-01', 2026, 3, 8, 1, 'Saturday');
         INSERT INTO dim_location (city, country, region)
             VALUES ('Cape Town', 'South Africa', 'Western Cape');",
    )?;
    Ok(())
}

#[test]
fn full_run_loads_and_reruns_idempotently() -> Result<(), Box<dyn Error>> {
    let root = test_root("full");
    let settings = settings_for(&root);
    write_staging(&settings)?;
    seed_reference_dims(&settings)?;

    // First run: everything lands.
    let first = pipeline::run(&settings)?;
    assert_eq!(first.facts_loaded, 12);
    assert_eq!(first.products.inserted, 2);
    assert_eq!(first.customers.inserted, 2);

    let conn = Connection::open(&settings.warehouse_path)?;

    let fact_count: i64 = conn.query_row("SELECT COUNT(*) FROM fact_sales", [], |r| r.get(0))?;
    assert_eq!(fact_count, 12);

    // Dedup kept the first occurrence of sale 555.
    let qty_555: f64 = conn.query_row(
        "SELECT quantity_sold FROM fact_sales WHERE sale_id = 555",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(qty_555, 3.0);

    // Streamed price beat the batch price on the current product version.
    let bamboo_price: f64 = conn.query_row(
        "SELECT price FROM dim_product \
         WHERE lower(trim(product_name)) = 'bamboo brush' AND is_current = 1",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(bamboo_price, 12.0);

    // A sale for an uncatalogued product is retained on the sentinel.
    let ghost_product_id: i64 = conn.query_row(
        "SELECT product_id FROM fact_sales WHERE sale_id = 12",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(ghost_product_id, 1);

    // Known keys resolved to real surrogates.
    let resolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fact_sales \
         WHERE sale_id = 1 AND product_id != 1 AND customer_id != 1 \
           AND location_id != 1 AND date_id != 1",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(resolved, 1);

    // Quality rows for all three datasets plus a SUCCESS metadata record.
    let quality_rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM data_quality_log WHERE run_id = ?1",
        [first.run_id.to_string()],
        |r| r.get(0),
    )?;
    assert_eq!(quality_rows, 3);
    let status: String = conn.query_row(
        "SELECT status FROM metadata_loads WHERE run_id = ?1",
        [first.run_id.to_string()],
        |r| r.get(0),
    )?;
    assert_eq!(status, "SUCCESS");

    // Second run over the same batch: no new facts, no new dimension rows.
    let second = pipeline::run(&settings)?;
    assert_eq!(second.facts_loaded, 12);
    assert_eq!(second.products.inserted, 0);
    assert_eq!(second.products.updated, 0);
    assert_eq!(second.customers.updated, 0);

    let fact_count: i64 = conn.query_row("SELECT COUNT(*) FROM fact_sales", [], |r| r.get(0))?;
    assert_eq!(fact_count, 12);
    let product_rows: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dim_product WHERE product_id != 1",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(product_rows, 2);

    Ok(())
}

#[test]
fn price_change_creates_a_new_current_version() -> Result<(), Box<dyn Error>> {
    let root = test_root("scd");
    let settings = settings_for(&root);
    write_staging(&settings)?;
    seed_reference_dims(&settings)?;

    pipeline::run(&settings)?;

    // Day 2: the batch reports a new price and no streamed overrides exist.
    fs::remove_file(settings.streaming_dir.join("update_001.json"))?;
    fs::remove_file(settings.streaming_dir.join("update_002.json"))?;
    fs::write(
        settings.staging_dir.join("products_2026-08-01.json"),
        r#"[
          {"name": "Bamboo Brush", "category": "home", "price": 15.0, "carbon_rating": 2},
          {"name": "Jute Bag", "category": "bags", "price": 3.5, "carbon_rating": 1}
        ]"#,
    )?;
    let second = pipeline::run(&settings)?;
    assert_eq!(second.products.updated, 1);
    assert_eq!(second.products.unchanged, 1);

    let conn = Connection::open(&settings.warehouse_path)?;
    let versions: Vec<(i64, f64, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT is_current, price, effective_start, effective_end \
             FROM dim_product WHERE lower(trim(product_name)) = 'bamboo brush' \
             ORDER BY product_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    assert_eq!(versions.len(), 2);
    let (expired, current) = (&versions[0], &versions[1]);
    assert_eq!(expired.0, 0);
    assert_eq!(expired.1, 12.0);
    assert_eq!(current.0, 1);
    assert_eq!(current.1, 15.0);
    assert_eq!(current.3, "infinity");
    // Continuity: the expired end equals the successor's start.
    assert_eq!(expired.3, current.2);

    // Exactly one current version per business key, always.
    let over_current: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (SELECT product_name FROM dim_product \
         WHERE is_current = 1 GROUP BY lower(trim(product_name)) HAVING COUNT(*) > 1)",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(over_current, 0);

    Ok(())
}

#[test]
fn failed_run_leaves_markers_and_an_error() -> Result<(), Box<dyn Error>> {
    let root = test_root("failure");
    let settings = settings_for(&root);
    // No staging directory at all: extraction is fatal.

    assert!(pipeline::run(&settings).is_err());

    let conn = Connection::open(&settings.warehouse_path)?;
    let (table, status): (String, String) = conn.query_row(
        "SELECT table_name, status FROM data_quality_log",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(table, "PIPELINE_ERROR");
    assert_eq!(status, "FAILED");

    let run_status: String =
        conn.query_row("SELECT status FROM metadata_loads", [], |r| r.get(0))?;
    assert_eq!(run_status, "FAILED");

    Ok(())
}

#[test]
fn empty_staging_with_streaming_updates_loads_products() -> Result<(), Box<dyn Error>> {
    let root = test_root("streaming_only");
    let settings = settings_for(&root);
    fs::create_dir_all(&settings.streaming_dir)?;
    fs::write(
        settings.streaming_dir.join("update_001.json"),
        r#"{"product_name": "Bamboo Brush", "new_price": 5.25}"#,
    )?;

    let summary = pipeline::run(&settings)?;
    assert_eq!(summary.facts_loaded, 0);
    assert_eq!(summary.products.inserted, 1);

    let conn = Connection::open(&settings.warehouse_path)?;
    let price: f64 = conn.query_row(
        "SELECT price FROM dim_product \
         WHERE lower(trim(product_name)) = 'bamboo brush' AND is_current = 1",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(price, 5.25);

    Ok(())
}

#[test]
fn empty_run_still_records_metadata() -> Result<(), Box<dyn Error>> {
    let root = test_root("empty");
    let settings = settings_for(&root);
    fs::create_dir_all(&settings.staging_dir)?;

    let summary = pipeline::run(&settings)?;
    assert_eq!(summary.facts_loaded, 0);

    let conn = Connection::open(&settings.warehouse_path)?;
    let (rows_loaded, status): (i64, String) = conn.query_row(
        "SELECT rows_loaded, status FROM metadata_loads",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(rows_loaded, 0);
    assert_eq!(status, "SUCCESS");

    Ok(())
}
