//! Typed datasets exchanged between pipeline stages.
//!
//! The extractor emits [`RawTable`]s with columns named as they appeared in
//! the source file; the transformer turns those into per-kind record types
//! so stage contracts are checked at compile time.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted file as a loosely typed table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name, ignoring case and surrounding whitespace.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(name))
    }

    /// Append a column filled with nulls and return its index.
    pub fn push_column(&mut self, name: &str) -> usize {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }
}

/// A product catalog row after column canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub carbon_footprint_rating: Option<i64>,
}

/// A customer directory row after column canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub loyalty_level: Option<String>,
    pub join_date: Option<NaiveDate>,
}

/// A sales row as extracted, before cleaning decides what survives.
/// Quantity and price stay loosely typed until cleaning coerces them.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleDraft {
    pub sale_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub sale_timestamp: Option<NaiveDateTime>,
    pub product_name: Option<String>,
    pub quantity: Option<Value>,
    pub price: Option<Value>,
    pub customer_email: Option<String>,
    pub city: Option<String>,
}

/// A cleaned, enriched sale ready for fact loading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub sale_id: i64,
    pub date: Option<NaiveDate>,
    pub sale_timestamp: Option<NaiveDateTime>,
    pub product_name: String,
    pub quantity: f64,
    pub price: f64,
    pub revenue: f64,
    pub carbon_savings: f64,
    pub customer_email: Option<String>,
    pub city: Option<String>,
}

/// A streamed near-real-time price override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub product_name: String,
    pub new_price: f64,
}

/// Everything the extractor produced for one run.
#[derive(Debug, Default)]
pub struct ExtractedBatch {
    pub sales: Option<RawTable>,
    pub products: Option<RawTable>,
    pub customers: Option<RawTable>,
}

impl ExtractedBatch {
    pub fn is_empty(&self) -> bool {
        self.sales.is_none() && self.products.is_none() && self.customers.is_none()
    }
}

/// Stage output of the transformer. A `None` dataset was never extracted;
/// an empty vector was extracted but cleaned down to nothing.
#[derive(Debug, Default)]
pub struct TransformedBatch {
    pub sales: Option<Vec<Sale>>,
    pub products: Option<Vec<Product>>,
    pub customers: Option<Vec<Customer>>,
}

/// Canonical key normalization used for business keys and fact lookups.
pub fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

pub(crate) fn value_to_date(value: &Value) -> Option<NaiveDate> {
    let text = value_to_string(value)?;
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| value_to_datetime(value).map(|dt| dt.date()))
}

pub(crate) fn value_to_datetime(value: &Value) -> Option<NaiveDateTime> {
    let text = value_to_string(value)?;
    let text = text.trim();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(value_to_f64(&json!("3.5")), Some(3.5));
        assert_eq!(value_to_f64(&json!(2)), Some(2.0));
        assert_eq!(value_to_i64(&json!("555")), Some(555));
        assert_eq!(value_to_i64(&json!(555.0)), Some(555));
        assert_eq!(value_to_i64(&json!("abc")), None);
    }

    #[test]
    fn parses_dates_and_timestamps() {
        assert_eq!(
            value_to_date(&json!("2026-08-01")),
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );
        assert_eq!(
            value_to_date(&json!("2026-08-01 13:45:00")),
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );
        assert!(value_to_datetime(&json!("2026-08-01T13:45:00")).is_some());
        assert!(value_to_date(&json!("not a date")).is_none());
    }

    #[test]
    fn column_lookup_ignores_case_and_whitespace() {
        let table = RawTable::new(vec!["Product_Name ".into(), "price".into()]);
        assert_eq!(table.column_index("product_name"), Some(0));
        assert_eq!(table.column_index("PRICE"), Some(1));
        assert_eq!(table.column_index("category"), None);
    }
}
