//! Builds one [`DashboardSnapshot`] out of every configured source.
use crate::core::analytics;
use crate::core::cache::TtlCache;
use crate::core::config::{AppConfig, Credentials};
use crate::core::model::{DashboardSnapshot, Network, PriceSnapshot, Sourced};
use crate::core::sources::{BlockExplorer, ChainIndexer, ExpenseSource, PriceOracle};
use crate::providers::util::{CachedHttp, RateLimiter, build_client};
use crate::providers::{CoingeckoProvider, EtherscanProvider, SheetsProvider, TaostatsProvider};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The upstream sources one aggregation reads from.
#[derive(Clone)]
pub struct Sources {
    pub indexer: Arc<dyn ChainIndexer>,
    pub explorer: Arc<dyn BlockExplorer>,
    pub oracle: Arc<dyn PriceOracle>,
    pub expenses: Arc<dyn ExpenseSource>,
}

impl Sources {
    /// Wires the HTTP adapters with one cache per source, sized by the
    /// configured TTLs.
    pub fn from_config(config: &AppConfig, credentials: Credentials) -> Result<Self> {
        let refresh = &config.refresh;
        let providers = &config.providers;
        let client = build_client(refresh.request_timeout())?;
        let http = |ttl: Duration| CachedHttp::new(client.clone(), Arc::new(TtlCache::new(ttl)));

        let limiter = Arc::new(RateLimiter::new(refresh.indexer_min_interval()));
        let indexer = TaostatsProvider::new(
            &providers.taostats.base_url,
            credentials.indexer_api_key,
            http(refresh.indexer_ttl()).with_rate_limiter(limiter),
        );
        let explorer = EtherscanProvider::new(
            &providers.etherscan.base_url,
            credentials.explorer_api_key,
            http(refresh.explorer_ttl()),
        );
        let oracle = CoingeckoProvider::new(
            &providers.coingecko.base_url,
            &providers.coingecko.subnet_coin_id,
            &providers.coingecko.native_coin_id,
            http(refresh.oracle_ttl()),
        );
        let expenses = SheetsProvider::new(
            providers.sheets.expenses_url(),
            http(refresh.sheets_ttl()),
        );

        Ok(Sources {
            indexer: Arc::new(indexer),
            explorer: Arc::new(explorer),
            oracle: Arc::new(oracle),
            expenses: Arc::new(expenses),
        })
    }
}

/// Collects names of sections that fell back to empty values.
#[derive(Default)]
struct Degraded(Vec<String>);

impl Degraded {
    fn take<T>(&mut self, section: &str, sourced: Sourced<T>) -> T {
        if sourced.degraded {
            self.0.push(section.to_string());
        }
        sourced.value
    }
}

/// Runs one aggregation. Never fails: unavailable sources leave their
/// sections zeroed and listed in `degraded_sources`.
pub async fn collect_snapshot(
    sources: &Sources,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> DashboardSnapshot {
    let mut degraded = Degraded::default();

    // Prices first, everything else is valued with them
    let (price, ticker, history, subnet_price, eth_price, expenses) = futures::join!(
        sources.indexer.price(),
        sources.oracle.native_ticker(),
        sources.oracle.native_history(),
        sources.oracle.subnet_price(),
        sources.explorer.token_price(),
        sources.expenses.expenses()
    );
    let price_degraded = price.degraded;
    let mut price = price.value;
    let tao_price_ticker = degraded.take("taoPriceTicker", ticker);
    let history = degraded.take("priceHistory", history);
    let subnet_price = degraded.take("subnetPrice", subnet_price);
    let eth_price = degraded.take("ethPrice", eth_price);
    let expenses = degraded.take("expenses", expenses);

    let native_price = analytics::resolve_native_price(price.current, tao_price_ticker.price);
    if price.current <= 0.0 && native_price > 0.0 {
        debug!(native_price, "Indexer price unavailable, using oracle ticker");
        price = PriceSnapshot {
            current: native_price,
            change_24h: tao_price_ticker.change_24h,
            ..price
        };
    } else if price_degraded && native_price <= 0.0 {
        // Only a price nothing could fill counts as unavailable
        degraded.0.push("price".to_string());
    }
    price.history = history;

    let tao_wallets = config.wallets_on(Network::Bittensor);
    let eth_wallets = config.wallets_on(Network::Ethereum);
    let hotkey = config.validator_hotkey();
    let threshold = config.large_tx_threshold;

    let (tao_balances, eth_balances, staking, transactions, large_transactions, alpha_trades) =
        futures::join!(
            sources.indexer.wallet_balances(&tao_wallets, native_price),
            sources.explorer.wallet_balances(&eth_wallets, eth_price),
            sources.indexer.staking(hotkey.as_deref(), native_price),
            sources.indexer.transfers(&tao_wallets, native_price, threshold),
            sources.indexer.large_transfers(&tao_wallets, native_price, threshold),
            sources.indexer.alpha_trades(config.subnet.id, native_price, threshold)
        );

    let mut wallets = degraded.take("taoWallets", tao_balances);
    wallets.extend(degraded.take("ethWallets", eth_balances));
    let staking = degraded.take("staking", staking);
    let mut transactions = degraded.take("transactions", transactions);
    transactions.truncate(config.transactions_limit);
    let large_transactions = degraded.take("largeTransactions", large_transactions);
    let alpha_trades = degraded.take("alphaTrades", alpha_trades);

    let treasury = analytics::treasury_overview(wallets, native_price, eth_price, &price);
    let burn_rate = analytics::with_runway(
        analytics::burn_snapshot(&expenses, now.date_naive(), config.recurring_monthly()),
        treasury.total_usd,
    );

    if degraded.0.is_empty() {
        info!(total_usd = treasury.total_usd, "Dashboard snapshot collected");
    } else {
        warn!(
            total_usd = treasury.total_usd,
            degraded = ?degraded.0,
            "Dashboard snapshot collected with unavailable sources"
        );
    }

    DashboardSnapshot {
        treasury,
        price,
        subnet_price,
        tao_price_ticker,
        staking,
        burn_rate,
        transactions,
        large_transactions,
        alpha_trades,
        degraded_sources: degraded.0,
        last_updated: now.timestamp_millis(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::analytics::RUNWAY_CAP_MONTHS;
    use crate::core::config::WalletConfig;
    use crate::core::model::{
        AlphaTrade, Expense, PricePoint, PriceTicker, StakingSnapshot, Transaction, WalletBalance,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;

    pub(crate) const CONFIG: &str = r#"
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
transactions_limit: 2
"#;

    /// Fixed-value sources. `indexer_price` of 0 simulates an unavailable indexer price.
    pub(crate) struct Stub {
        pub indexer_price: f64,
    }

    fn balances(wallets: &[WalletConfig], price: f64, balance: f64) -> Vec<WalletBalance> {
        wallets
            .iter()
            .map(|w| WalletBalance {
                name: w.name.clone(),
                address: w.address.clone(),
                network: w.network,
                balance,
                balance_usd: balance * price,
                token: w.network.token().to_string(),
            })
            .collect()
    }

    #[async_trait]
    impl ChainIndexer for Stub {
        async fn price(&self) -> Sourced<PriceSnapshot> {
            if self.indexer_price <= 0.0 {
                return Sourced::unavailable();
            }
            Sourced::ok(PriceSnapshot {
                current: self.indexer_price,
                change_24h: 2.0,
                change_7d: 5.0,
                ..Default::default()
            })
        }

        async fn wallet_balances(
            &self,
            wallets: &[WalletConfig],
            price: f64,
        ) -> Sourced<Vec<WalletBalance>> {
            Sourced::ok(balances(wallets, price, 100.0))
        }

        async fn staking(&self, hotkey: Option<&str>, price: f64) -> Sourced<StakingSnapshot> {
            assert!(hotkey.is_some());
            Sourced::ok(StakingSnapshot {
                total_delegated: 1000.0,
                total_delegated_usd: 1000.0 * price,
                staker_count: 12,
                ..Default::default()
            })
        }

        async fn transfers(
            &self,
            _wallets: &[WalletConfig],
            price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<Transaction>> {
            Sourced::ok(
                (0..5)
                    .map(|i| Transaction {
                        hash: format!("0x{i}"),
                        timestamp: 1000 - i,
                        amount: 1.0,
                        amount_usd: price,
                        ..Default::default()
                    })
                    .collect(),
            )
        }

        async fn large_transfers(
            &self,
            _wallets: &[WalletConfig],
            _price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<Transaction>> {
            Sourced::ok(Vec::new())
        }

        async fn alpha_trades(
            &self,
            netuid: u16,
            _price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<AlphaTrade>> {
            assert_eq!(netuid, 37);
            Sourced::ok(vec![AlphaTrade {
                extrinsic_id: "1-2".to_string(),
                ..Default::default()
            }])
        }
    }

    #[async_trait]
    impl BlockExplorer for Stub {
        async fn token_price(&self) -> Sourced<f64> {
            Sourced::ok(2000.0)
        }

        async fn wallet_balances(
            &self,
            wallets: &[WalletConfig],
            price: f64,
        ) -> Sourced<Vec<WalletBalance>> {
            Sourced::ok(balances(wallets, price, 2.5))
        }
    }

    #[async_trait]
    impl PriceOracle for Stub {
        async fn subnet_price(&self) -> Sourced<PriceSnapshot> {
            Sourced::ok(PriceSnapshot {
                current: 1.25,
                ..Default::default()
            })
        }

        async fn native_ticker(&self) -> Sourced<PriceTicker> {
            Sourced::ok(PriceTicker {
                price: 390.0,
                change_24h: -1.0,
            })
        }

        async fn native_history(&self) -> Sourced<Vec<PricePoint>> {
            Sourced::ok(vec![PricePoint {
                timestamp: 1,
                price: 380.0,
            }])
        }
    }

    #[async_trait]
    impl ExpenseSource for Stub {
        async fn expenses(&self) -> Sourced<Vec<Expense>> {
            Sourced::ok(vec![Expense {
                date: "2025-03-05".to_string(),
                payor: "Labs".to_string(),
                item: "CTO Salary".to_string(),
                category: "Personnel".to_string(),
                cost: 9000.0,
                ..Default::default()
            }])
        }
    }

    /// Every call fails with no cached fallback.
    pub(crate) struct Unavailable;

    #[async_trait]
    impl ChainIndexer for Unavailable {
        async fn price(&self) -> Sourced<PriceSnapshot> {
            Sourced::unavailable()
        }

        async fn wallet_balances(
            &self,
            wallets: &[WalletConfig],
            _price: f64,
        ) -> Sourced<Vec<WalletBalance>> {
            Sourced::partial(balances(wallets, 0.0, 0.0), true)
        }

        async fn staking(&self, _hotkey: Option<&str>, _price: f64) -> Sourced<StakingSnapshot> {
            Sourced::unavailable()
        }

        async fn transfers(
            &self,
            _wallets: &[WalletConfig],
            _price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<Transaction>> {
            Sourced::unavailable()
        }

        async fn large_transfers(
            &self,
            _wallets: &[WalletConfig],
            _price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<Transaction>> {
            Sourced::unavailable()
        }

        async fn alpha_trades(
            &self,
            _netuid: u16,
            _price: f64,
            _large_threshold: f64,
        ) -> Sourced<Vec<AlphaTrade>> {
            Sourced::unavailable()
        }
    }

    #[async_trait]
    impl BlockExplorer for Unavailable {
        async fn token_price(&self) -> Sourced<f64> {
            Sourced::unavailable()
        }

        async fn wallet_balances(
            &self,
            wallets: &[WalletConfig],
            _price: f64,
        ) -> Sourced<Vec<WalletBalance>> {
            Sourced::partial(balances(wallets, 0.0, 0.0), true)
        }
    }

    #[async_trait]
    impl PriceOracle for Unavailable {
        async fn subnet_price(&self) -> Sourced<PriceSnapshot> {
            Sourced::unavailable()
        }

        async fn native_ticker(&self) -> Sourced<PriceTicker> {
            Sourced::unavailable()
        }

        async fn native_history(&self) -> Sourced<Vec<PricePoint>> {
            Sourced::unavailable()
        }
    }

    #[async_trait]
    impl ExpenseSource for Unavailable {
        async fn expenses(&self) -> Sourced<Vec<Expense>> {
            Sourced::unavailable()
        }
    }

    pub(crate) fn stub_sources(indexer_price: f64) -> Sources {
        let stub = Arc::new(Stub { indexer_price });
        Sources {
            indexer: stub.clone(),
            explorer: stub.clone(),
            oracle: stub.clone(),
            expenses: stub,
        }
    }

    pub(crate) fn unavailable_sources() -> Sources {
        Sources {
            indexer: Arc::new(Unavailable),
            explorer: Arc::new(Unavailable),
            oracle: Arc::new(Unavailable),
            expenses: Arc::new(Unavailable),
        }
    }

    pub(crate) fn config() -> AppConfig {
        serde_yaml::from_str(CONFIG).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_from_all_sources() {
        let snapshot = collect_snapshot(&stub_sources(400.0), &config(), now()).await;

        assert!(snapshot.degraded_sources.is_empty());
        assert_eq!(snapshot.price.current, 400.0);
        assert_eq!(snapshot.price.change_24h, 2.0);
        assert_eq!(snapshot.price.history.len(), 1);
        assert_eq!(snapshot.subnet_price.current, 1.25);
        assert_eq!(snapshot.tao_price_ticker.price, 390.0);

        let treasury = &snapshot.treasury;
        assert_eq!(treasury.wallets.len(), 3);
        assert_eq!(treasury.total_tao, 200.0);
        assert_eq!(treasury.total_eth, 2.5);
        assert_eq!(treasury.total_usd, 200.0 * 400.0 + 2.5 * 2000.0);
        assert_eq!(treasury.change_24h, 2.0);

        assert_eq!(snapshot.staking.staker_count, 12);
        assert_eq!(snapshot.staking.total_delegated_usd, 400_000.0);
        assert_eq!(snapshot.transactions.len(), 2);
        assert_eq!(snapshot.alpha_trades.len(), 1);

        let burn = &snapshot.burn_rate;
        assert_eq!(burn.monthly_burn, 3000.0);
        assert_eq!(burn.runway_months, treasury.total_usd / 3000.0);
        assert!(!burn.runway_infinite);
        assert_eq!(snapshot.last_updated, now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_oracle_ticker_covers_missing_indexer_price() {
        let snapshot = collect_snapshot(&stub_sources(0.0), &config(), now()).await;

        assert_eq!(snapshot.price.current, 390.0);
        assert_eq!(snapshot.price.change_24h, -1.0);
        assert!(snapshot.degraded_sources.is_empty());
        assert_eq!(snapshot.treasury.total_usd, 200.0 * 390.0 + 2.5 * 2000.0);
        assert_eq!(snapshot.staking.total_delegated_usd, 390_000.0);
    }

    #[tokio::test]
    async fn test_unavailable_sources_yield_zeroed_snapshot() {
        let snapshot = collect_snapshot(&unavailable_sources(), &config(), now()).await;

        assert_eq!(snapshot.treasury.total_usd, 0.0);
        assert_eq!(snapshot.treasury.wallets.len(), 3);
        assert!(snapshot.treasury.wallets.iter().all(|w| w.balance == 0.0));
        assert_eq!(snapshot.price, PriceSnapshot::default());
        assert_eq!(snapshot.staking, StakingSnapshot::default());
        assert!(snapshot.transactions.is_empty());
        assert_eq!(snapshot.burn_rate.runway_months, RUNWAY_CAP_MONTHS);
        assert!(snapshot.burn_rate.runway_infinite);

        for section in [
            "price",
            "taoPriceTicker",
            "subnetPrice",
            "ethPrice",
            "expenses",
            "taoWallets",
            "ethWallets",
            "staking",
            "transactions",
            "alphaTrades",
        ] {
            assert!(
                snapshot.degraded_sources.iter().any(|s| s == section),
                "{section} should be degraded"
            );
        }
    }
}
