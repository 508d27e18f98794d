use crate::core::model::Network;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

pub const INDEXER_API_KEY_ENV: &str = "TAOSTATS_API_KEY";
pub const EXPLORER_API_KEY_ENV: &str = "ETHERSCAN_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubnetConfig {
    pub id: u16,
    pub name: String,
    /// Validator hotkey used for staking figures. Falls back to the first
    /// bittensor wallet whose name mentions "validator".
    pub validator_hotkey: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WalletConfig {
    pub name: String,
    pub address: String,
    pub network: Network,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecurringExpense {
    pub item: String,
    pub payor: Option<String>,
    pub monthly_cost: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub indexer_ttl_secs: u64,
    pub explorer_ttl_secs: u64,
    pub oracle_ttl_secs: u64,
    pub sheets_ttl_secs: u64,
    /// Minimum spacing between two indexer requests, shared by all callers.
    pub indexer_min_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// How often `summary --watch` re-aggregates.
    pub poll_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            indexer_ttl_secs: 300,
            explorer_ttl_secs: 600,
            oracle_ttl_secs: 300,
            sheets_ttl_secs: 3600,
            indexer_min_interval_ms: 1000,
            request_timeout_secs: 15,
            poll_interval_secs: 60,
        }
    }
}

impl RefreshConfig {
    pub fn indexer_ttl(&self) -> Duration {
        Duration::from_secs(self.indexer_ttl_secs)
    }

    pub fn explorer_ttl(&self) -> Duration {
        Duration::from_secs(self.explorer_ttl_secs)
    }

    pub fn oracle_ttl(&self) -> Duration {
        Duration::from_secs(self.oracle_ttl_secs)
    }

    pub fn sheets_ttl(&self) -> Duration {
        Duration::from_secs(self.sheets_ttl_secs)
    }

    pub fn indexer_min_interval(&self) -> Duration {
        Duration::from_millis(self.indexer_min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaostatsProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EtherscanProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoingeckoProviderConfig {
    pub base_url: String,
    /// Oracle coin id of the subnet token.
    pub subnet_coin_id: String,
    /// Oracle coin id of the chain's native token.
    pub native_coin_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SheetsProviderConfig {
    pub base_url: String,
    pub expenses_sheet_id: Option<String>,
    /// Full CSV export URL, takes precedence over `expenses_sheet_id`.
    pub expenses_csv_url: Option<String>,
}

impl SheetsProviderConfig {
    pub fn expenses_url(&self) -> Option<String> {
        self.expenses_csv_url.clone().or_else(|| {
            self.expenses_sheet_id.as_ref().map(|id| {
                format!(
                    "{}/spreadsheets/d/{}/export?format=csv",
                    self.base_url.trim_end_matches('/'),
                    id
                )
            })
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub taostats: TaostatsProviderConfig,
    pub etherscan: EtherscanProviderConfig,
    pub coingecko: CoingeckoProviderConfig,
    pub sheets: SheetsProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            taostats: TaostatsProviderConfig {
                base_url: "https://api.taostats.io/api".to_string(),
            },
            etherscan: EtherscanProviderConfig {
                base_url: "https://api.etherscan.io/api".to_string(),
            },
            coingecko: CoingeckoProviderConfig {
                base_url: "https://api.coingecko.com/api/v3".to_string(),
                subnet_coin_id: "finetuning".to_string(),
                native_coin_id: "bittensor".to_string(),
            },
            sheets: SheetsProviderConfig {
                base_url: "https://docs.google.com".to_string(),
                expenses_sheet_id: None,
                expenses_csv_url: None,
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Credentials for the upstream APIs. Never part of the config file.
#[derive(Clone, Default)]
pub struct Credentials {
    pub indexer_api_key: Option<String>,
    pub explorer_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Credentials {
            indexer_api_key: read(INDEXER_API_KEY_ENV),
            explorer_api_key: read(EXPLORER_API_KEY_ENV),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("indexer_api_key", &self.indexer_api_key.as_ref().map(|_| "***"))
            .field("explorer_api_key", &self.explorer_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

fn default_large_tx_threshold() -> f64 {
    100.0
}

fn default_transactions_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub subnet: SubnetConfig,
    pub wallets: Vec<WalletConfig>,
    /// Transfers at or above this many tokens are flagged as large.
    #[serde(default = "default_large_tx_threshold")]
    pub large_tx_threshold: f64,
    #[serde(default = "default_transactions_limit")]
    pub transactions_limit: usize,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub recurring_expenses: Vec<RecurringExpense>,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "subnet-treasury", "subnet-treasury")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn wallets_on(&self, network: Network) -> Vec<WalletConfig> {
        self.wallets
            .iter()
            .filter(|w| w.network == network)
            .cloned()
            .collect()
    }

    pub fn validator_hotkey(&self) -> Option<String> {
        self.subnet.validator_hotkey.clone().or_else(|| {
            self.wallets
                .iter()
                .find(|w| {
                    w.network == Network::Bittensor && w.name.to_lowercase().contains("validator")
                })
                .map(|w| w.address.clone())
        })
    }

    /// Sum of the configured recurring schedule, per month.
    pub fn recurring_monthly(&self) -> f64 {
        self.recurring_expenses
            .iter()
            .map(|e| e.monthly_cost.max(0.0))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
subnet:
  id: 37
  name: "Aurelius"
wallets:
  - name: "Aurelius Foundation"
    address: "5DXqqdrvu5FK3dASRVTCdGPZKx4Q9nkAZZSmibKG6PEEeW4j"
    network: bittensor
  - name: "Aurelius Validator"
    address: "5CSrYw5nGquFeZKL1Py8H3vgqcEh2v9pzDaFnrCFySG5m5AY"
    network: bittensor
  - name: "Aurelius Labs (ETH)"
    address: "0x8BD57fA41f0165a6e76e21676ACa235240e939bB"
    network: ethereum
"#;

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).expect("Failed to deserialize");

        assert_eq!(config.subnet.id, 37);
        assert_eq!(config.wallets.len(), 3);
        assert_eq!(config.wallets_on(Network::Bittensor).len(), 2);
        assert_eq!(config.wallets_on(Network::Ethereum).len(), 1);
        assert_eq!(config.large_tx_threshold, 100.0);
        assert_eq!(config.transactions_limit, 50);
        assert_eq!(config.refresh.indexer_ttl_secs, 300);
        assert_eq!(config.refresh.indexer_min_interval_ms, 1000);
        assert_eq!(
            config.providers.taostats.base_url,
            "https://api.taostats.io/api"
        );
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(config.providers.sheets.expenses_url().is_none());
        assert_eq!(config.recurring_monthly(), 0.0);
    }

    #[test]
    fn test_validator_hotkey_falls_back_to_wallet_name() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(
            config.validator_hotkey().as_deref(),
            Some("5CSrYw5nGquFeZKL1Py8H3vgqcEh2v9pzDaFnrCFySG5m5AY")
        );

        let mut config = config;
        config.subnet.validator_hotkey = Some("5Hotkey".to_string());
        assert_eq!(config.validator_hotkey().as_deref(), Some("5Hotkey"));
    }

    #[test]
    fn test_provider_overrides_and_recurring_schedule() {
        let yaml = format!(
            r#"{MINIMAL}
large_tx_threshold: 250
refresh:
  indexer_min_interval_ms: 0
providers:
  sheets:
    base_url: "http://example.com/"
    expenses_sheet_id: "abc123"
recurring_expenses:
  - item: "CTO Salary"
    payor: "Labs"
    monthly_cost: 10000
  - item: "Notion"
    monthly_cost: 20
"#
        );
        let config: AppConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(config.large_tx_threshold, 250.0);
        assert_eq!(config.refresh.indexer_min_interval_ms, 0);
        // untouched refresh fields keep their defaults
        assert_eq!(config.refresh.sheets_ttl_secs, 3600);
        assert_eq!(
            config.providers.sheets.expenses_url().as_deref(),
            Some("http://example.com/spreadsheets/d/abc123/export?format=csv")
        );
        // other providers keep defaults when only one is overridden
        assert_eq!(config.providers.coingecko.native_coin_id, "bittensor");
        assert_eq!(config.recurring_monthly(), 10020.0);
    }
}
