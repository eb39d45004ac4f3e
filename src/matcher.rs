//! Carbon-rating lookup over the product catalog.
//!
//! Resolution is a deterministic ladder: exact normalized match, then
//! substring containment (shortest key wins), then Jaro-Winkler similarity
//! above a fixed threshold. Anything else falls back to the neutral rating.

use std::collections::HashMap;

use strsim::jaro_winkler;

use crate::dataset::{normalize_key, Product};

/// Neutral rating assumed when a product cannot be matched.
pub const DEFAULT_RATING: i64 = 5;

const SIMILARITY_THRESHOLD: f64 = 0.92;

pub struct RatingMatcher {
    ratings: HashMap<String, i64>,
    /// Keys sorted lexicographically so every scan is deterministic.
    keys: Vec<String>,
}

impl RatingMatcher {
    pub fn from_products(products: &[Product]) -> Self {
        let mut ratings = HashMap::new();
        for product in products {
            let (Some(name), Some(rating)) = (&product.product_name, product.carbon_footprint_rating)
            else {
                continue;
            };
            let key = normalize_key(name);
            if key.is_empty() {
                continue;
            }
            ratings.entry(key).or_insert(rating);
        }
        let mut keys: Vec<String> = ratings.keys().cloned().collect();
        keys.sort();
        Self { ratings, keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve the rating for one product name.
    pub fn rating_for(&self, product_name: &str) -> i64 {
        let needle = normalize_key(product_name);
        if needle.is_empty() {
            return DEFAULT_RATING;
        }

        if let Some(rating) = self.ratings.get(&needle) {
            return *rating;
        }

        // Containment in either direction; shortest key wins, lexicographic
        // order breaks length ties (keys are pre-sorted).
        let mut contained: Vec<&String> = self
            .keys
            .iter()
            .filter(|key| key.contains(&needle) || needle.contains(key.as_str()))
            .collect();
        contained.sort_by_key(|key| key.len());
        if let Some(key) = contained.first() {
            return self.ratings[key.as_str()];
        }

        let mut best: Option<(&str, f64)> = None;
        for key in &self.keys {
            let score = jaro_winkler(&needle, key);
            if score < SIMILARITY_THRESHOLD {
                continue;
            }
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((key, score));
            }
        }
        best.map(|(key, _)| self.ratings[key]).unwrap_or(DEFAULT_RATING)
    }
}
