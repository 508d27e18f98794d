use super::util::{
    CachedHttp, address_of, coerce_f64, first_present, lenient_f64, non_negative, or_unavailable,
    timestamp_millis,
};
use crate::core::analytics::dedupe_newest_first;
use crate::core::config::WalletConfig;
use crate::core::model::{
    AlphaTrade, Direction, Network, PriceSnapshot, RAO_PER_TAO, Sourced, StakePoint,
    StakingSnapshot, TradeKind, Transaction, WalletBalance,
};
use crate::core::sources::ChainIndexer;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, instrument, warn};

const TRANSFER_LIMIT: &str = "20";
const LARGE_TRANSFER_LIMIT: &str = "100";
const TRADE_LIMIT: &str = "100";
const STAKE_HISTORY_LIMIT: &str = "30";

/// Taostats chain indexer client.
pub struct TaostatsProvider {
    base_url: String,
    api_key: Option<String>,
    http: CachedHttp,
}

impl TaostatsProvider {
    pub fn new(base_url: &str, api_key: Option<String>, http: CachedHttp) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("TAOSTATS_API_KEY environment variable is not set"))?;

        let url = Url::parse_with_params(&format!("{}{}", self.base_url, endpoint), params)?;
        let key = format!("{}?{}", endpoint, url.query().unwrap_or_default());
        let request = self
            .http
            .client()
            .get(url)
            .header("accept", "application/json")
            .header("Authorization", api_key);

        self.http.get_json(&key, request).await
    }

    async fn fetch_price(&self) -> Result<PriceSnapshot> {
        let page: Page<PriceRow> = self.get("/price/latest/v1", &[("asset", "tao")]).await?;
        let row = page.data.into_iter().next().unwrap_or_default();

        Ok(PriceSnapshot {
            current: non_negative(row.price),
            change_24h: row.percent_change_24h,
            change_7d: row.percent_change_7d,
            volume_24h: non_negative(row.volume_24h),
            market_cap: non_negative(row.market_cap),
            history: Vec::new(),
        })
    }

    async fn fetch_balance(&self, address: &str) -> Result<f64> {
        let page: Page<AccountRow> = self
            .get("/account/latest/v1", &[("address", address)])
            .await?;
        let raw = page
            .data
            .first()
            .and_then(|row| first_present(&[&row.balance_total, &row.balance_free]))
            .map(coerce_f64)
            .unwrap_or(0.0);
        Ok(non_negative(Network::Bittensor.to_tokens(raw)))
    }

    async fn fetch_stake(&self, hotkey: &str) -> Result<(f64, u64)> {
        let page: Page<StakeRow> = self
            .get("/dtao/stake_balance/latest/v1", &[("hotkey", hotkey)])
            .await?;

        let total_raw: f64 = page
            .data
            .iter()
            .map(|row| {
                first_present(&[&row.balance_as_tao, &row.balance])
                    .map(coerce_f64)
                    .unwrap_or(0.0)
            })
            .sum();
        let staker_count = page
            .pagination
            .map(|p| non_negative(p.total_items) as u64)
            .unwrap_or(0);

        Ok((non_negative(rao_if_oversized(total_raw)), staker_count))
    }

    async fn fetch_validator(&self, hotkey: &str) -> Result<(u32, f64)> {
        let page: Page<ValidatorRow> = self
            .get("/dtao/validator/latest/v1", &[("hotkey", hotkey)])
            .await?;
        let row = page.data.into_iter().next().unwrap_or_default();

        // apr comes as a fraction; values above 1 are already percentages
        let apr = non_negative(row.apr);
        let apy = if apr <= 1.0 { apr * 100.0 } else { apr };
        Ok((non_negative(row.rank) as u32, apy))
    }

    async fn fetch_stake_history(&self, hotkey: &str) -> Result<Vec<StakePoint>> {
        let page: Page<ValidatorHistoryRow> = self
            .get(
                "/dtao/validator/history/v1",
                &[("hotkey", hotkey), ("limit", STAKE_HISTORY_LIMIT)],
            )
            .await?;

        let mut history: Vec<StakePoint> = page
            .data
            .iter()
            .map(|row| StakePoint {
                timestamp: timestamp_millis(&row.timestamp),
                amount: non_negative(rao_if_oversized(
                    first_present(&[&row.global_weighted_stake, &row.stake])
                        .map(coerce_f64)
                        .unwrap_or(0.0),
                )),
            })
            .filter(|point| point.timestamp > 0)
            .collect();
        history.sort_by_key(|point| point.timestamp);
        Ok(history)
    }

    async fn fetch_transfers(
        &self,
        wallet: &WalletConfig,
        params: &[(&str, &str)],
        price: f64,
        large: impl Fn(f64) -> bool,
    ) -> Result<Vec<Transaction>> {
        let mut query = vec![("address", wallet.address.as_str())];
        query.extend_from_slice(params);
        let page: Page<TransferRow> = self.get("/transfer/v1", &query).await?;

        Ok(page
            .data
            .iter()
            .map(|row| {
                let amount = non_negative(Network::Bittensor.to_tokens(coerce_f64(&row.amount)));
                let from = address_of(&row.from);
                let to = address_of(&row.to);
                let direction = if from == wallet.address {
                    Direction::Send
                } else {
                    Direction::Receive
                };
                Transaction {
                    hash: row
                        .transaction_hash
                        .clone()
                        .or_else(|| row.extrinsic_id.clone())
                        .unwrap_or_default(),
                    timestamp: timestamp_millis(&row.timestamp),
                    from,
                    to,
                    amount,
                    amount_usd: amount * price,
                    direction,
                    is_large: large(amount),
                    wallet: wallet.name.clone(),
                }
            })
            .collect())
    }

    async fn collect_transfers(
        &self,
        wallets: &[WalletConfig],
        params: &[(&str, &str)],
        price: f64,
        large: impl Fn(f64) -> bool + Copy,
        what: &str,
    ) -> Sourced<Vec<Transaction>> {
        let mut transactions = Vec::new();
        let mut degraded = false;

        // Sequential on purpose: the indexer throttles bursts.
        for wallet in wallets.iter().filter(|w| w.network == Network::Bittensor) {
            match self.fetch_transfers(wallet, params, price, large).await {
                Ok(mut found) => transactions.append(&mut found),
                Err(e) => {
                    degraded = true;
                    error!(error = %e, wallet = %wallet.name, "Error fetching {what}");
                }
            }
        }

        Sourced::partial(
            dedupe_newest_first(transactions, |tx| tx.hash.as_str(), |tx| tx.timestamp),
            degraded,
        )
    }

    async fn fetch_alpha_trades(
        &self,
        netuid: u16,
        price: f64,
        large_threshold: f64,
    ) -> Result<Vec<AlphaTrade>> {
        let netuid = netuid.to_string();
        let amount_min = format!("{:.0}", large_threshold.max(0.0) * RAO_PER_TAO);
        let page: Page<DelegationRow> = self
            .get(
                "/delegation/v1",
                &[
                    ("netuid", netuid.as_str()),
                    ("amount_min", amount_min.as_str()),
                    ("limit", TRADE_LIMIT),
                ],
            )
            .await?;

        let trades = page
            .data
            .iter()
            .map(|row| {
                let tao_amount = non_negative(Network::Bittensor.to_tokens(coerce_f64(&row.amount)));
                let usd = row.usd.as_ref().map(coerce_f64).unwrap_or(0.0);
                AlphaTrade {
                    extrinsic_id: row.extrinsic_id.clone().unwrap_or_default(),
                    timestamp: timestamp_millis(&row.timestamp),
                    coldkey: address_of(&row.nominator),
                    hotkey: address_of(&row.delegate),
                    kind: trade_kind(&row.action),
                    alpha_amount: non_negative(Network::Bittensor.to_tokens(coerce_f64(&row.alpha))),
                    tao_amount,
                    usd_value: if usd > 0.0 { usd } else { tao_amount * price },
                    is_large: tao_amount >= large_threshold,
                }
            })
            .collect();

        Ok(dedupe_newest_first(
            trades,
            |t| t.extrinsic_id.as_str(),
            |t| t.timestamp,
        ))
    }
}

/// Some indexer fields named in tokens actually carry rao.
fn rao_if_oversized(value: f64) -> f64 {
    if value > RAO_PER_TAO {
        value / RAO_PER_TAO
    } else {
        value
    }
}

fn trade_kind(action: &str) -> TradeKind {
    let action = action.to_uppercase();
    if action.contains("UNDELEGATE") || action.contains("UNSTAKE") || action.contains("REMOVE") {
        TradeKind::Unstake
    } else {
        TradeKind::Stake
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default, deserialize_with = "lenient_f64")]
    total_items: f64,
}

#[derive(Debug, Default, Deserialize)]
struct PriceRow {
    #[serde(default, deserialize_with = "lenient_f64")]
    price: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    percent_change_24h: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    percent_change_7d: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume_24h: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap: f64,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    balance_total: Option<Value>,
    balance_free: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StakeRow {
    balance_as_tao: Option<Value>,
    balance: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidatorRow {
    #[serde(default, deserialize_with = "lenient_f64")]
    rank: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    apr: f64,
}

#[derive(Debug, Deserialize)]
struct ValidatorHistoryRow {
    #[serde(default)]
    timestamp: Value,
    global_weighted_stake: Option<Value>,
    stake: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransferRow {
    transaction_hash: Option<String>,
    extrinsic_id: Option<String>,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    from: Value,
    #[serde(default)]
    to: Value,
    #[serde(default)]
    amount: Value,
}

#[derive(Debug, Deserialize)]
struct DelegationRow {
    #[serde(default)]
    action: String,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    alpha: Value,
    usd: Option<Value>,
    #[serde(default)]
    nominator: Value,
    #[serde(default)]
    delegate: Value,
    extrinsic_id: Option<String>,
    #[serde(default)]
    timestamp: Value,
}

#[async_trait]
impl ChainIndexer for TaostatsProvider {
    #[instrument(name = "TaostatsPrice", skip(self))]
    async fn price(&self) -> Sourced<PriceSnapshot> {
        or_unavailable(self.fetch_price().await, "TAO price")
    }

    #[instrument(name = "TaostatsBalances", skip_all, fields(wallets = wallets.len()))]
    async fn wallet_balances(
        &self,
        wallets: &[WalletConfig],
        price: f64,
    ) -> Sourced<Vec<WalletBalance>> {
        let mut balances = Vec::new();
        let mut degraded = false;

        for wallet in wallets.iter().filter(|w| w.network == Network::Bittensor) {
            let balance = match self.fetch_balance(&wallet.address).await {
                Ok(balance) => balance,
                Err(e) => {
                    degraded = true;
                    error!(error = %e, wallet = %wallet.name, "Error fetching balance");
                    0.0
                }
            };
            balances.push(WalletBalance {
                name: wallet.name.clone(),
                address: wallet.address.clone(),
                network: Network::Bittensor,
                balance,
                balance_usd: balance * price,
                token: Network::Bittensor.token().to_string(),
            });
        }

        Sourced::partial(balances, degraded)
    }

    #[instrument(name = "TaostatsStaking", skip(self))]
    async fn staking(&self, hotkey: Option<&str>, price: f64) -> Sourced<StakingSnapshot> {
        let Some(hotkey) = hotkey else {
            warn!("No validator hotkey configured, staking data unavailable");
            return Sourced::unavailable();
        };

        let mut degraded = false;
        let (total_delegated, staker_count) =
            self.fetch_stake(hotkey).await.unwrap_or_else(|e| {
                degraded = true;
                error!(error = %e, "Error fetching staking data");
                (0.0, 0)
            });
        let (validator_rank, apy) = self.fetch_validator(hotkey).await.unwrap_or_else(|e| {
            degraded = true;
            warn!(error = %e, "Validator rank and APY unavailable");
            (0, 0.0)
        });
        let stake_history = self.fetch_stake_history(hotkey).await.unwrap_or_else(|e| {
            degraded = true;
            warn!(error = %e, "Stake history unavailable");
            Vec::new()
        });

        Sourced::partial(
            StakingSnapshot {
                total_delegated,
                total_delegated_usd: total_delegated * price,
                staker_count,
                validator_rank,
                apy,
                stake_history,
            },
            degraded,
        )
    }

    #[instrument(name = "TaostatsTransfers", skip_all)]
    async fn transfers(
        &self,
        wallets: &[WalletConfig],
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<Transaction>> {
        self.collect_transfers(
            wallets,
            &[("limit", TRANSFER_LIMIT)],
            price,
            move |amount| amount >= large_threshold,
            "transactions",
        )
        .await
    }

    #[instrument(name = "TaostatsLargeTransfers", skip_all)]
    async fn large_transfers(
        &self,
        wallets: &[WalletConfig],
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<Transaction>> {
        let amount_min = format!("{:.0}", large_threshold.max(0.0) * RAO_PER_TAO);
        self.collect_transfers(
            wallets,
            &[
                ("amount_min", amount_min.as_str()),
                ("limit", LARGE_TRANSFER_LIMIT),
            ],
            price,
            |_| true,
            "large transactions",
        )
        .await
    }

    #[instrument(name = "TaostatsAlphaTrades", skip(self))]
    async fn alpha_trades(
        &self,
        netuid: u16,
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<AlphaTrade>> {
        or_unavailable(
            self.fetch_alpha_trades(netuid, price, large_threshold).await,
            "alpha trades",
        )
    }
}
