//! Terminal dashboard for a running energy monitor service.
//!
//! Usage:
//!   cargo run --bin dashboard -- watch --period monthly --tariff 1444.7
//!   cargo run --bin dashboard -- toggle lampu on

use std::{io::Write, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::time;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_monitor_service::{
    client::DashboardClient,
    dashboard::{poll, DashboardView},
    db::models::ActuatorState,
};

#[derive(Parser, Debug)]
#[command(name = "dashboard", version, about = "Energy monitor terminal dashboard")]
struct Args {
    /// Base URL of the service.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,
    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the service and redraw the screen until Ctrl+C.
    Watch {
        #[arg(long, default_value_t = 3)]
        refresh_secs: u64,
        /// weekly, monthly or yearly
        #[arg(long, default_value = "weekly")]
        period: String,
        /// Cost per kWh; the service default applies when omitted.
        #[arg(long)]
        tariff: Option<f64>,
        /// Readings requested per poll.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Switch a relay on or off.
    Toggle {
        device: String,
        /// on or off
        state: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = DashboardClient::new(&args.url, Duration::from_secs(args.timeout_secs))?;

    match args.command {
        Command::Watch { refresh_secs, period, tariff, limit } => {
            let mut view = DashboardView::new();
            let mut ticker = time::interval(Duration::from_secs(refresh_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => break,
                }

                let outcome = poll(&client, limit, &period, tariff).await;
                if let Err(e) = &outcome.data {
                    warn!(error = %e, "Polling /data failed");
                }
                if let Err(e) = &outcome.cost {
                    warn!(error = %e, "Polling /cost_summary failed");
                }
                let frame = view.update(outcome, Utc::now());
                // Clear screen, cursor home
                print!("\x1B[2J\x1B[H{frame}");
                std::io::stdout().flush().context("failed to write frame")?;
            }
        }
        Command::Toggle { device, state } => {
            let state: ActuatorState = state
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid state")?;
            let resp = client.set_state(&device, state).await?;
            println!("{} -> {} ({})", resp.device, resp.current_state, resp.status);
        }
    }

    Ok(())
}
