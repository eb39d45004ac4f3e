//! Fact table loading: surrogate-key resolution and keyed upsert.

use std::collections::HashMap;

use rusqlite::types::Value;
use tracing::info;

use super::{opt_text, RowSet, Warehouse, SENTINEL_KEY};
use crate::dataset::{normalize_key, Sale};
use crate::error::Result;

/// The fixed fact projection; nothing else reaches the table.
const FACT_COLUMNS: [&str; 9] = [
    "sale_id",
    "date_id",
    "product_id",
    "customer_id",
    "location_id",
    "quantity_sold",
    "revenue",
    "carbon_savings",
    "sale_timestamp",
];

impl Warehouse {
    /// Resolve every natural key to a dimension surrogate. Unresolved or
    /// missing keys map to the sentinel member and the row is retained.
    pub fn map_fact_foreign_keys(&self, sales: &[Sale]) -> Result<RowSet> {
        let dates = self.lookup_map("SELECT date, date_id FROM dim_date", false)?;
        let products = self.lookup_map(
            "SELECT product_name, product_id FROM dim_product WHERE is_current = 1",
            true,
        )?;
        let customers = self.lookup_map(
            "SELECT email, customer_id FROM dim_customer WHERE is_current = 1",
            true,
        )?;
        let locations = self.lookup_map("SELECT city, location_id FROM dim_location", true)?;

        let mut rows = RowSet::new(&FACT_COLUMNS);
        for sale in sales {
            let date_id = sale
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .and_then(|key| dates.get(&key).copied())
                .unwrap_or(SENTINEL_KEY);
            let product_id = products
                .get(&normalize_key(&sale.product_name))
                .copied()
                .unwrap_or(SENTINEL_KEY);
            let customer_id = sale
                .customer_email
                .as_deref()
                .and_then(|email| customers.get(&normalize_key(email)).copied())
                .unwrap_or(SENTINEL_KEY);
            let location_id = sale
                .city
                .as_deref()
                .and_then(|city| locations.get(&normalize_key(city)).copied())
                .unwrap_or(SENTINEL_KEY);

            rows.push(vec![
                Value::Integer(sale.sale_id),
                Value::Integer(date_id),
                Value::Integer(product_id),
                Value::Integer(customer_id),
                Value::Integer(location_id),
                Value::Real(sale.quantity),
                Value::Real(sale.revenue),
                Value::Real(sale.carbon_savings),
                opt_text(
                    sale.sale_timestamp
                        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                ),
            ]);
        }
        info!("Fact table ready with surrogate keys mapped: {} rows", rows.len());
        Ok(rows)
    }

    /// Resolve and upsert one sales batch; re-runs converge on `sale_id`.
    pub fn load_facts(&mut self, sales: &[Sale]) -> Result<usize> {
        let rows = self.map_fact_foreign_keys(sales)?;
        self.upsert("fact_sales", &["sale_id"], &rows)
    }

    fn lookup_map(&self, sql: &str, normalize: bool) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut map = HashMap::new();
        while let Some(row) = rows.next()? {
            let Some(key) = row.get::<_, Option<String>>(0)? else {
                continue;
            };
            let id: i64 = row.get(1)?;
            let key = if normalize { normalize_key(&key) } else { key };
            map.insert(key, id);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::scd::{DimRecord, PRODUCT_DIMENSION};
    use chrono::NaiveDate;

    fn sale(id: i64, product: &str, city: Option<&str>) -> Sale {
        Sale {
            sale_id: id,
            date: NaiveDate::from_ymd_opt(2026, 8, 1),
            sale_timestamp: None,
            product_name: product.to_string(),
            quantity: 2.0,
            price: 4.5,
            revenue: 9.0,
            carbon_savings: 16.0,
            customer_email: Some("buyer@example.com".to_string()),
            city: city.map(|c| c.to_string()),
        }
    }

    fn seeded_warehouse() -> Warehouse {
        let mut wh = Warehouse::open_in_memory().unwrap();
        wh.connection()
            .execute_batch(
                "INSERT INTO dim_date (date, year, quarter, month, day, weekday)
                     VALUES ('2026-08-01', 2026, 3, 8, 1, 'Saturday');
                 INSERT INTO dim_location (city, country, region)
                     VALUES ('Cape Town', 'South Africa', 'Western Cape');",
            )
            .unwrap();
        wh.load_dimension(
            &PRODUCT_DIMENSION,
            vec![DimRecord {
                business_key: Some("Bamboo Brush".to_string()),
                attributes: vec![
                    Value::Text("home".to_string()),
                    Value::Real(4.5),
                    Value::Integer(2),
                ],
            }],
        )
        .unwrap();
        wh
    }

    #[test]
    fn resolves_known_keys_and_defaults_unknown_to_sentinel() {
        let wh = seeded_warehouse();
        let rows = wh
            .map_fact_foreign_keys(&[
                sale(1, "bamboo brush", Some("cape town")),
                sale(2, "Ghost Product", None),
            ])
            .unwrap();
        assert_eq!(rows.len(), 2);

        // Known product and city resolve to real surrogates.
        assert!(rows.rows[0][2] != Value::Integer(SENTINEL_KEY));
        assert!(rows.rows[0][4] != Value::Integer(SENTINEL_KEY));
        // Unknown product and missing city fall back to the sentinel and
        // the row is kept.
        assert_eq!(rows.rows[1][2], Value::Integer(SENTINEL_KEY));
        assert_eq!(rows.rows[1][4], Value::Integer(SENTINEL_KEY));
        // No customer dimension rows exist, so emails hit the sentinel too.
        assert_eq!(rows.rows[0][3], Value::Integer(SENTINEL_KEY));
    }

    #[test]
    fn fact_load_is_idempotent_on_sale_id() {
        let mut wh = seeded_warehouse();
        let batch = vec![sale(10, "Bamboo Brush", Some("Cape Town"))];
        wh.load_facts(&batch).unwrap();
        wh.load_facts(&batch).unwrap();

        let count: i64 = wh
            .connection()
            .query_row("SELECT COUNT(*) FROM fact_sales WHERE sale_id = 10", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
