//! File extraction: staging-area batch files and streamed price updates.

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{Number, Value};
use tracing::{debug, error, info, warn};

use crate::dataset::{ExtractedBatch, PriceUpdate, RawTable};
use crate::error::{EtlError, Result};

/// Extract a single file based on its extension. Unsupported extensions and
/// read failures are logged and yield `None`; a single bad file never aborts
/// the run.
pub fn extract_file(path: &Path) -> Option<RawTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let result = match ext.as_str() {
        "csv" => read_csv(path),
        "json" => read_json(path),
        "xlsx" | "xls" => read_excel(path),
        _ => {
            warn!("Unsupported file type: {}", path.display());
            return None;
        }
    };

    match result {
        Ok(table) => {
            info!("Extracted {}: {} rows", path.display(), table.len());
            Some(table)
        }
        Err(e) => {
            error!("Failed to extract {}: {}", path.display(), e);
            None
        }
    }
}

fn read_csv(path: &Path) -> Result<RawTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut table = RawTable::new(columns);
    for record in reader.records() {
        let record = record?;
        let row = record
            .iter()
            .map(|cell| {
                if cell.trim().is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                }
            })
            .collect();
        table.rows.push(row);
    }
    Ok(table)
}

fn read_json(path: &Path) -> Result<RawTable> {
    let file = File::open(path)?;
    let parsed: Value = serde_json::from_reader(BufReader::new(file))?;
    let Value::Array(objects) = parsed else {
        return Err(EtlError::Extract(format!(
            "{} is not a JSON array of records",
            path.display()
        )));
    };

    // Columns are the union of keys across all records, in first-seen order.
    let mut table = RawTable::default();
    for object in &objects {
        let Value::Object(map) = object else {
            return Err(EtlError::Extract(format!(
                "{} contains a non-object record",
                path.display()
            )));
        };
        for key in map.keys() {
            if table.column_index(key).is_none() {
                table.push_column(key);
            }
        }
    }
    for object in objects {
        let Value::Object(map) = object else {
            continue;
        };
        let row = table
            .columns
            .iter()
            .map(|c| map.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        table.rows.push(row);
    }
    Ok(table)
}

fn read_excel(path: &Path) -> Result<RawTable> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| EtlError::Extract(format!("{} has no sheets", path.display())))?;
    let range = workbook.worksheet_range(&sheet)?;

    let mut rows = range.rows();
    let columns: Vec<String> = rows
        .next()
        .ok_or_else(|| EtlError::Extract(format!("{} sheet '{}' is empty", path.display(), sheet)))?
        .iter()
        .map(cell_to_header)
        .collect();

    let mut table = RawTable::new(columns);
    for row in rows {
        table.rows.push(row.iter().map(cell_to_value).collect());
    }
    Ok(table)
}

fn cell_to_header(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::Number((*i).into()),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::String(d.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) => Value::Null,
    }
}

/// Load all streamed price-update files from `dir`, one JSON object per
/// file. A missing directory or an empty set is not an error. Files are
/// read in sorted filename order so the latest-named update wins ties.
pub fn extract_streaming_updates(dir: &Path) -> Vec<PriceUpdate> {
    if !dir.is_dir() {
        info!("Streaming directory not found: {} - skipping", dir.display());
        return Vec::new();
    }

    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
            })
            .collect(),
        Err(e) => {
            warn!("Could not read streaming directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    paths.sort();

    let mut updates = Vec::new();
    for path in paths {
        match fs::read_to_string(&path)
            .map_err(EtlError::from)
            .and_then(|text| serde_json::from_str::<PriceUpdate>(&text).map_err(EtlError::from))
        {
            Ok(update) => updates.push(update),
            Err(e) => warn!("Invalid streaming update {}: {}", path.display(), e),
        }
    }

    if updates.is_empty() {
        info!("No streaming update files found");
    } else {
        info!("Loaded {} real-time price updates", updates.len());
    }
    updates
}

/// Extract every classifiable file from the staging directory and fold in
/// streamed price updates. Only a missing staging directory is fatal.
pub fn extract_all(staging_dir: &Path, streaming_dir: &Path) -> Result<ExtractedBatch> {
    if !staging_dir.is_dir() {
        return Err(EtlError::Extract(format!(
            "Staging directory not found: {}",
            staging_dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(staging_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut batch = ExtractedBatch::default();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase())
            .unwrap_or_default();

        let Some(table) = extract_file(&path) else {
            continue;
        };

        if name.contains("sales") {
            batch.sales = Some(table);
        } else if name.contains("products") {
            batch.products = Some(table);
        } else if name.contains("customers") {
            batch.customers = Some(table);
        } else {
            debug!("Unclassified staging file: {}", path.display());
        }
    }

    let missing: Vec<&str> = [
        ("sales", batch.sales.is_none()),
        ("products", batch.products.is_none()),
        ("customers", batch.customers.is_none()),
    ]
    .into_iter()
    .filter(|entry| entry.1)
    .map(|entry| entry.0)
    .collect();
    if !missing.is_empty() {
        warn!("Missing batch data sources: {:?}", missing);
    }

    let updates = extract_streaming_updates(streaming_dir);
    if !updates.is_empty() {
        match batch.products.as_mut() {
            Some(products) => merge_price_updates(products, &updates),
            None => warn!("No batch products found - cannot apply streaming updates"),
        }
    }

    Ok(batch)
}

/// Overwrite batch prices with streamed ones where the product name matches.
/// Updates that match no batch row are no-ops and are logged.
fn merge_price_updates(products: &mut RawTable, updates: &[PriceUpdate]) {
    let Some(name_idx) = products
        .column_index("product_name")
        .or_else(|| products.column_index("name"))
    else {
        warn!("Products table has no product name column - cannot apply streaming updates");
        return;
    };
    let price_idx = products
        .column_index("price")
        .unwrap_or_else(|| products.push_column("price"));

    let mut applied = 0usize;
    for update in updates {
        let target = update.product_name.trim();
        let mut matched = false;
        for row in &mut products.rows {
            let row_name = row[name_idx].as_str().map(str::trim);
            if row_name == Some(target) {
                row[price_idx] = Number::from_f64(update.new_price)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                matched = true;
            }
        }
        if matched {
            applied += 1;
        } else {
            warn!(
                "Streaming update for '{}' matches no batch product - skipping",
                update.product_name
            );
        }
    }
    info!("Applied {} streaming updates to products", applied);
}
