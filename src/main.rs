mod config;
mod models;
mod services;
mod sources;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use services::{Poller, PollerStats};
use sources::coingecko::CoinGeckoQuotes;
use sources::owlracle::OwlracleGas;
use sources::pools::OnChainPools;

fn config_path(args: &[String]) -> String {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,defi_snapshots=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let path = config_path(&args);
    let config = Config::load(&path)?;
    tracing::info!("✓ Configuration loaded from {}", path);

    let store = services::store::connect(&config.store.url).await?;
    tracing::info!("✓ Snapshot store connected ({})", store.name());

    let mut pollers = JoinSet::new();
    let mut stats: Vec<(&'static str, Arc<PollerStats>)> = Vec::new();

    if config.gas.chains.is_empty() {
        tracing::warn!("⚠️ No gas chains configured, gas poller disabled");
    } else {
        let source = OwlracleGas::new(config.gas.clone(), &config.http)?;
        let poller = Poller::new(source, store.clone(), config.gas_delay());
        stats.push(("gas", poller.stats()));
        pollers.spawn(poller.run());
    }

    if config.quotes.tokens.is_empty() {
        tracing::warn!("⚠️ No quote tokens configured, quote poller disabled");
    } else {
        let source = CoinGeckoQuotes::new(config.quotes.clone(), &config.http)?;
        let poller = Poller::new(source, store.clone(), config.quotes_delay());
        stats.push(("quotes", poller.stats()));
        pollers.spawn(poller.run());
    }

    let pools = &config.pools;
    if pools.swap.is_empty() && pools.multichain.is_empty() && pools.symbiosis.is_empty() {
        tracing::warn!("⚠️ No pools configured, pool poller disabled");
    } else {
        let source = OnChainPools::new(&config)?;
        let poller = Poller::new(source, store.clone(), config.pools_delay());
        stats.push(("pools", poller.stats()));
        pollers.spawn(poller.run());
    }

    if stats.is_empty() {
        return Err("nothing to poll, check the configuration".into());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    pollers.abort_all();

    for (dataset, s) in &stats {
        tracing::info!(
            "{} poller stopped: {} cycles, {} failed, last success {}",
            dataset,
            s.cycles.load(Ordering::Relaxed),
            s.failures.load(Ordering::Relaxed),
            s.last_success()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    Ok(())
}
