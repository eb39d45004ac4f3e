//! Schema canonicalization, sales cleaning and enrichment.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::dataset::{
    value_to_date, value_to_datetime, value_to_f64, value_to_i64, value_to_string, Customer,
    ExtractedBatch, Product, RawTable, Sale, SaleDraft, TransformedBatch,
};
use crate::matcher::{RatingMatcher, DEFAULT_RATING};
use crate::outliers::AnomalyDetector;

/// Outlier detection is skipped below this many rows.
pub const MIN_OUTLIER_ROWS: usize = 10;

lazy_static! {
    /// Strips currency symbols, thousands separators and other junk from
    /// price cells before numeric coercion.
    static ref NON_NUMERIC: Regex = Regex::new(r"[^0-9.]").unwrap();
}

/// Find a canonical column in the source table, trying its known source
/// aliases; a miss is logged once and the field is filled with nulls.
fn resolve_column(table: &RawTable, canonical: &str, aliases: &[&str], kind: &str) -> Option<usize> {
    let index = table
        .column_index(canonical)
        .or_else(|| aliases.iter().find_map(|alias| table.column_index(alias)));
    if index.is_none() {
        warn!(
            "{} input is missing column '{}' - filling with nulls",
            kind, canonical
        );
    }
    index
}

fn cell<'a>(row: &'a [Value], index: Option<usize>) -> Option<&'a Value> {
    index.and_then(|i| row.get(i)).filter(|v| !v.is_null())
}

/// Map a raw products table onto the warehouse schema.
pub fn canonicalize_products(table: &RawTable) -> Vec<Product> {
    let name = resolve_column(table, "product_name", &["name"], "products");
    let category = resolve_column(table, "category", &[], "products");
    let price = resolve_column(table, "price", &[], "products");
    let rating = resolve_column(table, "carbon_footprint_rating", &["carbon_rating"], "products");

    table
        .rows
        .iter()
        .map(|row| Product {
            product_name: cell(row, name).and_then(value_to_string),
            category: cell(row, category).and_then(value_to_string),
            price: cell(row, price).and_then(value_to_f64),
            carbon_footprint_rating: cell(row, rating).and_then(value_to_i64),
        })
        .collect()
}

/// Map a raw customers table onto the warehouse schema. Unparseable join
/// dates are coerced to null rather than carried as text.
pub fn canonicalize_customers(table: &RawTable) -> Vec<Customer> {
    let name = resolve_column(table, "customer_name", &["name"], "customers");
    let email = resolve_column(table, "email", &[], "customers");
    let loyalty = resolve_column(table, "loyalty_level", &[], "customers");
    let join_date = resolve_column(table, "join_date", &[], "customers");

    table
        .rows
        .iter()
        .map(|row| Customer {
            customer_name: cell(row, name).and_then(value_to_string),
            email: cell(row, email).and_then(value_to_string),
            loyalty_level: cell(row, loyalty).and_then(value_to_string),
            join_date: cell(row, join_date).and_then(value_to_date),
        })
        .collect()
}

/// Map a raw sales table onto draft records; cleaning decides what survives.
pub fn canonicalize_sales(table: &RawTable) -> Vec<SaleDraft> {
    let sale_id = resolve_column(table, "sale_id", &[], "sales");
    let date = resolve_column(table, "date", &[], "sales");
    let timestamp = resolve_column(table, "sale_timestamp", &[], "sales");
    let product = resolve_column(table, "product_name", &[], "sales");
    let quantity = resolve_column(table, "quantity", &[], "sales");
    let price = resolve_column(table, "price", &[], "sales");
    let email = resolve_column(table, "customer_email", &[], "sales");
    let city = resolve_column(table, "city", &[], "sales");

    table
        .rows
        .iter()
        .map(|row| SaleDraft {
            sale_id: cell(row, sale_id).and_then(value_to_i64),
            date: cell(row, date).and_then(value_to_date),
            sale_timestamp: cell(row, timestamp).and_then(value_to_datetime),
            product_name: cell(row, product).and_then(value_to_string),
            quantity: cell(row, quantity).cloned(),
            price: cell(row, price).cloned(),
            customer_email: cell(row, email).and_then(value_to_string),
            city: cell(row, city).and_then(value_to_string),
        })
        .collect()
}

fn coerce_price(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => {
            let stripped = NON_NUMERIC.replace_all(s, "");
            if stripped.is_empty() {
                None
            } else {
                stripped.parse().ok()
            }
        }
        other => value_to_f64(other),
    }
}

/// Drop rows missing sale id, product name or quantity; deduplicate by sale
/// id keeping the first occurrence; coerce quantity and price (stripping
/// non-numeric characters from the latter) and require both strictly
/// positive. Revenue and carbon savings are filled by enrichment.
pub fn clean_sales(drafts: Vec<SaleDraft>) -> Vec<Sale> {
    let before = drafts.len();
    let mut seen_ids = HashSet::new();
    let mut sales = Vec::new();

    for draft in drafts {
        let (Some(sale_id), Some(product_name), Some(quantity_raw)) =
            (draft.sale_id, draft.product_name, draft.quantity)
        else {
            continue;
        };
        // First occurrence of a sale id claims it, even if it then fails
        // coercion, matching keep-first semantics.
        if !seen_ids.insert(sale_id) {
            continue;
        }
        let Some(quantity) = value_to_f64(&quantity_raw) else {
            continue;
        };
        let Some(price) = draft.price.as_ref().and_then(coerce_price) else {
            continue;
        };
        if quantity <= 0.0 || price <= 0.0 {
            continue;
        }

        sales.push(Sale {
            sale_id,
            date: draft.date,
            sale_timestamp: draft.sale_timestamp,
            product_name,
            quantity,
            price,
            revenue: 0.0,
            carbon_savings: 0.0,
            customer_email: draft.customer_email,
            city: draft.city,
        });
    }

    info!("After cleaning sales: {} of {} rows remaining", sales.len(), before);
    sales
}

/// Compute revenue and carbon savings for every sale. Ratings come from the
/// product catalog; with no catalog or no match the neutral rating applies.
pub fn enrich_sales(sales: &mut [Sale], products: Option<&[Product]>) {
    let matcher = products.map(RatingMatcher::from_products);
    if matcher.is_none() {
        warn!("No products dataset for enrichment - using neutral carbon rating");
    }

    for sale in sales.iter_mut() {
        let rating = matcher
            .as_ref()
            .map(|m| m.rating_for(&sale.product_name))
            .unwrap_or(DEFAULT_RATING);
        sale.revenue = sale.quantity * sale.price;
        sale.carbon_savings = sale.quantity * (10 - rating) as f64;
    }
    info!("Enriched {} sales with revenue and carbon savings", sales.len());
}

/// Discard the rows the detector flags as anomalous on (quantity, revenue).
/// Small inputs are returned unchanged.
pub fn filter_outliers(
    sales: Vec<Sale>,
    detector: &dyn AnomalyDetector,
    contamination: f64,
) -> Vec<Sale> {
    if sales.len() < MIN_OUTLIER_ROWS {
        warn!("Too few rows for outlier detection - skipping");
        return sales;
    }

    let points: Vec<(f64, f64)> = sales.iter().map(|s| (s.quantity, s.revenue)).collect();
    let flags = detector.flag(&points, contamination);
    let before = sales.len();
    let kept: Vec<Sale> = sales
        .into_iter()
        .zip(flags)
        .filter(|(_, flagged)| !flagged)
        .map(|(sale, _)| sale)
        .collect();
    info!(
        "Removed {} outliers ({:.1}% target)",
        before - kept.len(),
        contamination * 100.0
    );
    kept
}

/// Full transformation pass: canonicalize products and customers, then
/// clean, enrich and outlier-filter sales. Enrichment runs before the
/// outlier filter because revenue is one of its features.
pub fn transform_all(
    batch: ExtractedBatch,
    detector: &dyn AnomalyDetector,
    contamination: f64,
) -> TransformedBatch {
    let products = batch.products.as_ref().map(canonicalize_products);
    let customers = batch.customers.as_ref().map(canonicalize_customers);

    let sales = batch.sales.as_ref().map(|table| {
        let drafts = canonicalize_sales(table);
        let mut cleaned = clean_sales(drafts);
        enrich_sales(&mut cleaned, products.as_deref());
        filter_outliers(cleaned, detector, contamination)
    });

    info!(
        "Transformation complete. Sales rows: {}",
        sales.as_ref().map(Vec::len).unwrap_or(0)
    );
    TransformedBatch {
        sales,
        products,
        customers,
    }
}
