use super::util::{CachedHttp, coerce_f64, non_negative, or_unavailable};
use crate::core::config::WalletConfig;
use crate::core::model::{Network, Sourced, WalletBalance};
use crate::core::sources::BlockExplorer;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, instrument, warn};

/// Etherscan block explorer client.
pub struct EtherscanProvider {
    base_url: String,
    api_key: Option<String>,
    http: CachedHttp,
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

impl EtherscanResponse {
    /// Etherscan reports failures, rate limits included, as HTTP 200 with
    /// status "0" and a message in `result`.
    fn check(&self, key: &str) -> Result<()> {
        if self.status.as_deref() == Some("0") {
            return Err(anyhow!(
                "Etherscan error for {}: {} ({})",
                key,
                self.message.as_deref().unwrap_or_default(),
                self.result.as_str().unwrap_or_default()
            ));
        }
        Ok(())
    }
}

impl EtherscanProvider {
    pub fn new(base_url: &str, api_key: Option<String>, http: CachedHttp) -> Self {
        if api_key.is_none() {
            warn!("ETHERSCAN_API_KEY not set, ETH balances will be 0");
        }
        Self {
            base_url: base_url.to_string(),
            api_key,
            http,
        }
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("ETHERSCAN_API_KEY environment variable is not set"))?;

        // The cache key leaves the API key out.
        let key = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let mut url = Url::parse_with_params(&self.base_url, params)?;
        url.query_pairs_mut().append_pair("apikey", api_key);

        let response: EtherscanResponse = self
            .http
            .get_json_checked(
                &key,
                self.http.client().get(url),
                |response: &EtherscanResponse| response.check(&key),
            )
            .await?;
        Ok(response.result)
    }

    async fn fetch_price(&self) -> Result<f64> {
        let result = self
            .call(&[("module", "stats"), ("action", "ethprice")])
            .await?;
        Ok(non_negative(
            result.get("ethusd").map(coerce_f64).unwrap_or(0.0),
        ))
    }

    async fn fetch_balance(&self, address: &str) -> Result<f64> {
        let result = self
            .call(&[
                ("module", "account"),
                ("action", "balance"),
                ("address", address),
                ("tag", "latest"),
            ])
            .await?;
        Ok(non_negative(Network::Ethereum.to_tokens(coerce_f64(&result))))
    }
}

#[async_trait]
impl BlockExplorer for EtherscanProvider {
    #[instrument(name = "EtherscanPrice", skip(self))]
    async fn token_price(&self) -> Sourced<f64> {
        or_unavailable(self.fetch_price().await, "ETH price")
    }

    #[instrument(name = "EtherscanBalances", skip_all, fields(wallets = wallets.len()))]
    async fn wallet_balances(
        &self,
        wallets: &[WalletConfig],
        price: f64,
    ) -> Sourced<Vec<WalletBalance>> {
        let mut balances = Vec::new();
        let mut degraded = false;

        for wallet in wallets.iter().filter(|w| w.network == Network::Ethereum) {
            let balance = match self.fetch_balance(&wallet.address).await {
                Ok(balance) => balance,
                Err(e) => {
                    degraded = true;
                    error!(error = %e, wallet = %wallet.name, "Error fetching ETH balance");
                    0.0
                }
            };
            balances.push(WalletBalance {
                name: wallet.name.clone(),
                address: wallet.address.clone(),
                network: Network::Ethereum,
                balance,
                balance_usd: balance * price,
                token: Network::Ethereum.token().to_string(),
            });
        }

        Sourced::partial(balances, degraded)
    }
}
