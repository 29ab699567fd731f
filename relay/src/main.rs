//! Pyth Price Relay
//!
//! Checks one feed's on-chain price record and refreshes it from Hermes
//! when it is older than the configured threshold.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use price_relay::composer::ConsumerBuilder;
use price_relay::consumer::{PriceReadConsumer, RefreshOnly};
use price_relay::fetcher::UpdateFetcher;
use price_relay::hermes::HermesClient;
use price_relay::ledger::RpcLedger;
use price_relay::{FeedId, PriceRelay, RelayOutcome, RelaySettings};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    signature::{Keypair, Signer},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "price-relay", version, about = "Refresh a stale Pyth price record on Solana")]
struct Args {
    /// Config file [default: relay-config.toml]
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Feed id, overriding config and FEED_ID
    #[arg(long)]
    feed_id: Option<FeedId>,

    /// Staleness threshold in seconds
    #[arg(long)]
    threshold: Option<u64>,

    /// Write a template config to PATH and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(path) = &args.init_config {
        return Config::write_default(path);
    }

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(feed_id) = args.feed_id {
        config.feed_id = Some(feed_id);
    }
    if let Some(threshold) = args.threshold {
        config.staleness_threshold_secs = Some(threshold);
    }

    let feed_id = config.feed_id()?;
    let threshold = config.staleness_threshold_secs()?;

    log::info!("Starting price relay for feed {}", feed_id);
    log::info!("Connected to RPC: {}", config.rpc_url);

    let payer = Arc::new(load_keypair(&config.keypair_path)?);
    log::info!("Fee payer: {}", payer.pubkey());

    let ledger = RpcLedger::new(config.rpc_url.clone(), payer, CommitmentConfig::confirmed())
        .with_confirmation(
            config.confirm_attempts,
            Duration::from_millis(config.confirm_interval_ms),
        );
    let hermes = HermesClient::new(
        &config.hermes_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let consumer: Arc<dyn ConsumerBuilder> = match config.consumer_program()? {
        Some(program) => {
            log::info!("Reading through consumer program {}", program);
            Arc::new(PriceReadConsumer::new(program, feed_id, config.max_price_age_secs))
        }
        None => {
            log::info!("No consumer program configured, refreshing only");
            Arc::new(RefreshOnly)
        }
    };

    let relay = PriceRelay::new(
        Arc::new(ledger),
        UpdateFetcher::new(Arc::new(hermes)),
        consumer,
        config.composer_config(),
        RelaySettings {
            feed_id,
            shard_id: config.shard_id,
            staleness_threshold_secs: threshold,
            post_options: config.post_options(),
            read_options: config.read_options(),
            prefetch: config.prefetch,
            deadline: config.deadline(),
        },
    );

    match relay.run().await {
        Ok(outcome) => {
            report(&outcome);
            Ok(())
        }
        Err(failure) => {
            log::error!("Failure kind: {:?}", failure.kind());
            if failure.is_partial() {
                log::error!(
                    "{} unit(s) landed before the failure; the record may already be refreshed",
                    failure.landed.len()
                );
                for signature in &failure.landed {
                    log::error!("  landed: {}", signature);
                }
                if let Some(signature) = &failure.in_flight {
                    log::error!("  sent, unconfirmed: {}", signature);
                }
            }
            Err(failure.into())
        }
    }
}

fn report(outcome: &RelayOutcome) {
    let price = outcome.price();
    match outcome {
        RelayOutcome::ReadOnly {
            record, signature, ..
        } => {
            log::info!("Record {} is fresh: {}", record, price.describe());
            if let Some(signature) = signature {
                log::info!("Read transaction: {}", signature);
            }
        }
        RelayOutcome::Refreshed {
            signatures,
            read_requested,
            ..
        } => {
            log::info!(
                "Posted {} (published at {}){}",
                price.describe(),
                price.publish_time,
                if *read_requested { " and read it" } else { "" }
            );
            for signature in signatures {
                log::info!("Transaction: {}", signature);
            }
        }
    }
}

/// Load fee payer keypair from file
fn load_keypair(path: &str) -> Result<Keypair> {
    let expanded_path = shellexpand::tilde(path);
    let bytes = std::fs::read(expanded_path.as_ref())
        .context(format!("Failed to read keypair from {}", path))?;

    let keypair = if bytes.first() == Some(&b'[') {
        // JSON format
        let json_data: Vec<u8> =
            serde_json::from_slice(&bytes).context("Failed to parse keypair JSON")?;
        Keypair::try_from(&json_data[..]).context("Failed to create keypair from bytes")?
    } else {
        // Binary format
        Keypair::try_from(&bytes[..]).context("Failed to create keypair from bytes")?
    };

    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_keypair_json_and_binary() {
        let keypair = Keypair::new();
        let dir = std::env::temp_dir();

        let json_path = dir.join(format!("relay-test-{}.json", keypair.pubkey()));
        std::fs::write(&json_path, serde_json::to_vec(&keypair.to_bytes().to_vec()).unwrap())
            .unwrap();
        let loaded = load_keypair(json_path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());

        let bin_path = dir.join(format!("relay-test-{}.bin", keypair.pubkey()));
        std::fs::write(&bin_path, keypair.to_bytes()).unwrap();
        let loaded = load_keypair(bin_path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());

        std::fs::remove_file(json_path).ok();
        std::fs::remove_file(bin_path).ok();
    }

    #[test]
    fn test_load_keypair_missing_file() {
        assert!(load_keypair("/nonexistent/relay/id.json").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "price-relay",
            "--feed-id",
            "0xe62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43",
            "--threshold",
            "30",
        ])
        .unwrap();
        assert_eq!(args.threshold, Some(30));
        assert!(args.feed_id.is_some());
        assert!(args.init_config.is_none());
    }
}
