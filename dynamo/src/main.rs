//! Daemon entry point: parses CLI flags, loads configuration, and runs the
//! synchronizer/demand/policy cycle either once or on the configured
//! cadence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dynamo_config::Config;
use dynamo_model::Inventory;
use dynamo_store::{LoadFilters, Store};
use dynamo_sync::Synchronizer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynamo", about = "Federated dataset placement and inventory daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Run a single synchronization cycle and exit, overriding `daemon_mode`.
    #[arg(long)]
    once: bool,

    /// Force read-only mode regardless of the config file's setting.
    #[arg(long)]
    read_only: bool,

    /// Submit copies/deletions in test mode (synthetic op ids, no remote effect).
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = Config::from_path(&cli.config).context("loading configuration")?;
    if cli.read_only {
        config.read_only = true;
    }
    if cli.once {
        config.daemon_mode = false;
    }
    info!(once = cli.once, read_only = config.read_only, dry_run = cli.dry_run, "starting dynamo");

    let mut store = Store::new(&config.store.url).context("opening inventory store")?;
    if !store.check_connection().await {
        anyhow::bail!("cannot reach inventory store at startup");
    }

    let synchronizer = Synchronizer::new(&config).context("building synchronizer REST clients")?;

    // The policy cycle (Detox eviction + Dealer) runs on its own cadence,
    // independent of the synchronizer's `refresh_min`, since eviction and
    // balancing decisions only need to react as often as demand actually
    // shifts.
    let mut last_policy_run: Option<i64> = None;

    loop {
        let now = current_epoch();
        if let Err(err) = run_cycle(&config, &synchronizer, &mut store, now).await {
            error!(%err, "synchronization cycle failed");
        }

        let due = last_policy_run.map_or(true, |last| now - last >= config.dealer.demand_refresh_interval_s as i64);
        if due {
            if let Err(err) = run_policy_cycle(&config, &synchronizer, &mut store, cli.dry_run, now).await {
                error!(%err, "policy cycle failed");
            }
            last_policy_run = Some(now);
        }

        if !config.daemon_mode {
            break;
        }
        tokio::time::sleep(Duration::from_secs(u64::from(config.inventory.refresh_min) * 60)).await;
    }

    store.close().await.context("closing inventory store")?;
    Ok(())
}

async fn run_cycle(config: &Config, synchronizer: &Synchronizer, store: &mut Store, now: i64) -> Result<()> {
    let mut inventory = Inventory::new();
    store.load(&mut inventory, &LoadFilters::unrestricted()).await.context("loading inventory")?;

    synchronizer.run_cycle(config, &mut inventory, store, now).await.context("running synchronization cycle")?;

    info!(
        datasets = inventory.datasets().count(),
        sites = inventory.sites().count(),
        "cycle complete"
    );
    Ok(())
}

async fn run_policy_cycle(config: &Config, synchronizer: &Synchronizer, store: &mut Store, dry_run: bool, now: i64) -> Result<()> {
    let mut inventory = Inventory::new();
    store.load(&mut inventory, &LoadFilters::unrestricted()).await.context("loading inventory for policy cycle")?;

    synchronizer.run_policy_cycle(config, &inventory, dry_run, now).await.context("running policy cycle")?;

    info!("policy cycle complete");
    Ok(())
}

fn current_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
