use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use eco_warehouse_etl::config::Settings;
use eco_warehouse_etl::pipeline;

#[derive(Parser)]
#[command(name = "eco-etl")]
#[command(about = "Eco-commerce warehouse ETL: extract, transform, load")]
struct Args {
    /// Directory holding the daily batch extracts
    #[arg(short, long)]
    staging_dir: Option<PathBuf>,

    /// Directory holding streamed price-update files
    #[arg(long)]
    streaming_dir: Option<PathBuf>,

    /// SQLite warehouse database path
    #[arg(short, long)]
    warehouse: Option<PathBuf>,

    /// Target fraction of sales rows discarded as outliers
    #[arg(long)]
    contamination: Option<f64>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if let Some(staging_dir) = args.staging_dir {
        settings.staging_dir = staging_dir;
    }
    if let Some(streaming_dir) = args.streaming_dir {
        settings.streaming_dir = streaming_dir;
    }
    if let Some(warehouse) = args.warehouse {
        settings.warehouse_path = warehouse;
    }
    if let Some(contamination) = args.contamination {
        settings.contamination = contamination;
    }

    let summary = pipeline::run(&settings)?;
    info!(
        "Run {}: {} fact rows loaded ({} new / {} changed products, {} new / {} changed customers)",
        summary.run_id,
        summary.facts_loaded,
        summary.products.inserted,
        summary.products.updated,
        summary.customers.inserted,
        summary.customers.updated,
    );
    Ok(())
}
