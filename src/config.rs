//! Runtime configuration.
//!
//! Defaults are compiled in, then overridden by an optional file and by
//! `LEDGER__*` environment variables.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File};
use serde::Deserialize;

pub use config::ConfigError;

use crate::amount::MAX_SCALE;
use crate::batcher::BatcherConfig;

/// Accounting engine the binary runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process engine; state is lost on exit.
    #[default]
    Memory,
    /// A TigerBeetle cluster, reached through `tigerbeetle_addresses`.
    TigerBeetle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CurrencyConfig {
    /// Engine ledger number all accounts of the currency live on.
    pub ledger: u32,
    /// Decimal places of the currency's minor unit.
    pub scale: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of transfers per engine call.
    pub batch_size: usize,
    /// Interval of the batcher's flush timer.
    pub flush_interval_ms: u64,
    /// Capacity of the transfer-spec cache.
    pub transfer_cache_max: usize,
    pub hub_participant_id: String,
    pub currencies: HashMap<String, CurrencyConfig>,
    pub engine: EngineKind,
    pub tigerbeetle_cluster_id: u64,
    /// Comma-separated replica addresses.
    pub tigerbeetle_addresses: String,
}

impl Default for Config {
    fn default() -> Self {
        let currencies = [
            ("USD", 840, 2),
            ("EUR", 978, 2),
            ("KES", 404, 2),
            ("XOF", 952, 0),
            ("JPY", 392, 0),
        ]
        .into_iter()
        .map(|(code, ledger, scale)| (code.to_string(), CurrencyConfig { ledger, scale }))
        .collect();

        Self {
            batch_size: 8190,
            flush_interval_ms: 5,
            transfer_cache_max: 1_000_000,
            hub_participant_id: "hub".to_string(),
            currencies,
            engine: EngineKind::Memory,
            tigerbeetle_cluster_id: 0,
            tigerbeetle_addresses: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let mut config: Config = builder
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        // keys may come back lowercased from some sources
        config.currencies = config
            .currencies
            .into_iter()
            .map(|(code, currency)| (code.to_ascii_uppercase(), currency))
            .collect();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Message("batch_size must be positive".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Message("flush_interval_ms must be positive".into()));
        }
        if let Some((code, _)) = self
            .currencies
            .iter()
            .find(|(_, currency)| currency.scale > MAX_SCALE)
        {
            return Err(ConfigError::Message(format!(
                "scale of {code} must be at most {MAX_SCALE}"
            )));
        }
        Ok(())
    }

    pub fn currency(&self, code: &str) -> Option<CurrencyConfig> {
        self.currencies.get(code).copied()
    }

    pub fn batcher(&self) -> BatcherConfig {
        BatcherConfig {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}
