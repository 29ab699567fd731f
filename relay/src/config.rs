//! Relay configuration

use anyhow::{bail, Context, Result};
use price_relay::composer::ComposerConfig;
use price_relay::feed::FeedId;
use price_relay::ledger::SubmitOptions;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "relay-config.toml";

/// BTC/USD, written into the template config
const TEMPLATE_FEED_ID: &str = "0xe62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RPC URL for Solana cluster
    pub rpc_url: String,

    /// Attestation service base URL
    pub hermes_url: String,

    /// Fee and rent payer keypair path
    pub keypair_path: String,

    /// Feed to relay; required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<FeedId>,

    /// Maximum record age in seconds before it is refreshed; required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness_threshold_secs: Option<u64>,

    /// Shard of the sharded price record
    pub shard_id: u16,

    /// Program reading the price; without one the relay only refreshes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_program: Option<String>,

    /// Maximum age the consumer accepts
    pub max_price_age_secs: u64,

    pub priority_fee_micro_lamports: u64,
    pub skip_preflight: bool,
    pub treasury_id: u8,
    pub guardian_signatures: u8,
    pub max_instructions_per_unit: usize,
    pub max_transaction_bytes: usize,

    /// Fetch the signed update while reading the record
    pub prefetch: bool,

    /// Bound on one run; 0 disables it
    pub deadline_secs: u64,

    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let composer = ComposerConfig::default();
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            hermes_url: "https://hermes.pyth.network".to_string(),
            keypair_path: "~/.config/solana/id.json".to_string(),
            feed_id: None,
            staleness_threshold_secs: None,
            shard_id: 0,
            consumer_program: None,
            max_price_age_secs: 7,
            priority_fee_micro_lamports: 50_000,
            skip_preflight: true,
            treasury_id: composer.treasury_id,
            guardian_signatures: composer.guardian_signatures,
            max_instructions_per_unit: composer.max_instructions_per_unit,
            max_transaction_bytes: composer.max_transaction_bytes,
            prefetch: false,
            deadline_secs: 60,
            confirm_attempts: 40,
            confirm_interval_ms: 500,
            request_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// A missing file is only tolerated at the default location, where
    /// required fields may still come from the environment or flags.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !explicit && !path.exists() {
            log::warn!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let config_str = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str).context("Failed to parse config TOML")?;

        Ok(config)
    }

    /// Apply `FEED_ID` and `FEE_AND_RENT_PAYER_KEYPAIR` overrides
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(feed_id) = lookup("FEED_ID") {
            self.feed_id = Some(
                FeedId::from_str(&feed_id).context("FEED_ID is not a valid feed id")?,
            );
        }
        if let Some(keypair_path) = lookup("FEE_AND_RENT_PAYER_KEYPAIR") {
            self.keypair_path = keypair_path;
        }
        Ok(())
    }

    pub fn feed_id(&self) -> Result<FeedId> {
        match self.feed_id {
            Some(feed_id) => Ok(feed_id),
            None => bail!("feed_id is required (config, FEED_ID or --feed-id)"),
        }
    }

    pub fn staleness_threshold_secs(&self) -> Result<u64> {
        match self.staleness_threshold_secs {
            Some(threshold) => Ok(threshold),
            None => bail!("staleness_threshold_secs is required (config or --threshold)"),
        }
    }

    pub fn consumer_program(&self) -> Result<Option<Pubkey>> {
        self.consumer_program
            .as_deref()
            .map(|program| {
                Pubkey::from_str(program)
                    .context(format!("Invalid consumer_program: {}", program))
            })
            .transpose()
    }

    pub fn composer_config(&self) -> ComposerConfig {
        ComposerConfig {
            treasury_id: self.treasury_id,
            guardian_signatures: self.guardian_signatures,
            max_instructions_per_unit: self.max_instructions_per_unit,
            max_transaction_bytes: self.max_transaction_bytes,
        }
    }

    pub fn post_options(&self) -> SubmitOptions {
        SubmitOptions {
            skip_preflight: self.skip_preflight,
            priority_fee: self.priority_fee_micro_lamports,
        }
    }

    /// Reads are simulated first; nothing is lost if they fail preflight
    pub fn read_options(&self) -> SubmitOptions {
        SubmitOptions {
            skip_preflight: false,
            priority_fee: self.priority_fee_micro_lamports,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }

    /// Template with every field filled in
    pub fn template() -> Self {
        Self {
            feed_id: FeedId::from_str(TEMPLATE_FEED_ID).ok(),
            staleness_threshold_secs: Some(30),
            ..Self::default()
        }
    }

    /// Write template config to file
    pub fn write_default(path: &Path) -> Result<()> {
        let config = Self::template();
        let toml_str = toml::to_string_pretty(&config).context("Failed to serialize config")?;

        std::fs::write(path, toml_str)
            .context(format!("Failed to write config to {}", path.display()))?;

        log::info!("Created default config at {}", path.display());
        Ok(())
    }
}
