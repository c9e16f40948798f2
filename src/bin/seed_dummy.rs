//! Fills the readings table with synthetic data.
//!
//! Usage:
//!   cargo run --bin seed_dummy -- --clear --backfill-hours 48 --count 0
//!   cargo run --bin seed_dummy                  # one round every 5 s until Ctrl+C

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use tokio::time;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_monitor_service::{
    config::Config,
    db,
    seed::{backfill, dummy_readings, insert_all},
    store::{PgStore, Store},
};

#[derive(Parser, Debug)]
#[command(about = "Insert dummy power and environment readings for every configured device.")]
struct Args {
    /// Overrides DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,
    /// Delete all existing readings first.
    #[arg(long, default_value_t = false)]
    clear: bool,
    /// Insert a historical series covering this many hours before now.
    #[arg(long, default_value_t = 0)]
    backfill_hours: i64,
    /// Spacing of backfilled readings.
    #[arg(long, default_value_t = 300)]
    step_secs: i64,
    /// Live rounds to insert after backfilling; runs until Ctrl+C when omitted.
    #[arg(long)]
    count: Option<u64>,
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
    /// Seed for reproducible data.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let database_url = args
        .database_url
        .clone()
        .or(config.database_url.clone())
        .context("DATABASE_URL (or --database-url) is required to seed readings")?;

    let pool = db::create_pool(&database_url, config.store_timeout).await?;
    db::run_migrations(&pool).await?;
    let store = Store::new(PgStore::new(pool), config.store_timeout);
    let catalog = config.devices;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    if args.clear {
        let removed = store.clear_readings().await.context("failed to clear readings")?;
        info!(removed, "Cleared readings");
    }

    if args.backfill_hours > 0 {
        let series = backfill(
            &mut rng,
            &catalog,
            Utc::now(),
            args.backfill_hours,
            chrono::Duration::seconds(args.step_secs),
        );
        let written = insert_all(&store, series).await.context("failed to insert backfill")?;
        info!(written, hours = args.backfill_hours, "Backfill inserted");
    }

    let mut ticker = time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let mut round: u64 = 0;
    loop {
        if args.count.is_some_and(|n| round >= n) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Seeder stopped");
                break;
            }
        }

        let readings = dummy_readings(&mut rng, &catalog, Utc::now());
        let written = insert_all(&store, readings).await.context("failed to insert dummy readings")?;
        round += 1;
        info!(round, written, "Dummy readings inserted");
    }

    Ok(())
}
