//! Runtime settings resolved from environment variables.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_STAGING_DIR: &str = "staging";
pub const DEFAULT_STREAMING_DIR: &str = "staging/streaming_updates";
pub const DEFAULT_WAREHOUSE_PATH: &str = "eco_warehouse.db";
pub const DEFAULT_CONTAMINATION: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the daily batch extracts.
    pub staging_dir: PathBuf,
    /// Directory holding streamed price-update files.
    pub streaming_dir: PathBuf,
    /// SQLite warehouse database path.
    pub warehouse_path: PathBuf,
    /// Target fraction of sales rows discarded as outliers.
    pub contamination: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            streaming_dir: PathBuf::from(DEFAULT_STREAMING_DIR),
            warehouse_path: PathBuf::from(DEFAULT_WAREHOUSE_PATH),
            contamination: DEFAULT_CONTAMINATION,
        }
    }
}

impl Settings {
    /// Build settings from `ECO_*` environment variables, falling back to
    /// the defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            staging_dir: env::var("ECO_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            streaming_dir: env::var("ECO_STREAMING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.streaming_dir),
            warehouse_path: env::var("ECO_WAREHOUSE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.warehouse_path),
            contamination: env::var("ECO_CONTAMINATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.contamination),
        }
    }
}
