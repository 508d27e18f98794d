use super::util::{CachedHttp, lenient_f64, non_negative, or_unavailable};
use crate::core::model::{PricePoint, PriceSnapshot, PriceTicker, Sourced};
use crate::core::sources::PriceOracle;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::instrument;

const HISTORY_DAYS: &str = "7";

/// CoinGecko price oracle client. No API key is needed for these endpoints.
pub struct CoingeckoProvider {
    base_url: String,
    subnet_coin_id: String,
    native_coin_id: String,
    http: CachedHttp,
}

#[derive(Debug, Default, Deserialize)]
struct CoinResponse {
    #[serde(default)]
    market_data: MarketData,
}

#[derive(Debug, Default, Deserialize)]
struct MarketData {
    #[serde(default)]
    current_price: UsdValue,
    #[serde(default, deserialize_with = "lenient_f64")]
    price_change_percentage_24h: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    price_change_percentage_7d: f64,
    #[serde(default)]
    total_volume: UsdValue,
    #[serde(default)]
    market_cap: UsdValue,
}

#[derive(Debug, Default, Deserialize)]
struct UsdValue {
    #[serde(default, deserialize_with = "lenient_f64")]
    usd: f64,
}

#[derive(Debug, Default, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SimplePrice {
    #[serde(default, deserialize_with = "lenient_f64")]
    usd: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    usd_24h_change: f64,
}

impl CoingeckoProvider {
    pub fn new(
        base_url: &str,
        subnet_coin_id: &str,
        native_coin_id: &str,
        http: CachedHttp,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            subnet_coin_id: subnet_coin_id.to_string(),
            native_coin_id: native_coin_id.to_string(),
            http,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let request = self
            .http
            .client()
            .get(&url)
            .header("accept", "application/json");
        self.http.get_json(endpoint, request).await
    }

    async fn fetch_history(&self, coin_id: &str) -> Result<Vec<PricePoint>> {
        let chart: MarketChart = self
            .get(&format!(
                "/coins/{coin_id}/market_chart?vs_currency=usd&days={HISTORY_DAYS}"
            ))
            .await?;
        Ok(chart.prices.iter().filter_map(price_point).collect())
    }

    async fn fetch_subnet_price(&self) -> Result<PriceSnapshot> {
        let coin: CoinResponse = self
            .get(&format!(
                "/coins/{}?localization=false&tickers=false&community_data=false&developer_data=false",
                self.subnet_coin_id
            ))
            .await?;
        let market = coin.market_data;
        let history = self.fetch_history(&self.subnet_coin_id).await?;

        Ok(PriceSnapshot {
            current: non_negative(market.current_price.usd),
            change_24h: market.price_change_percentage_24h,
            change_7d: market.price_change_percentage_7d,
            volume_24h: non_negative(market.total_volume.usd),
            market_cap: non_negative(market.market_cap.usd),
            history,
        })
    }

    async fn fetch_ticker(&self) -> Result<PriceTicker> {
        let prices: HashMap<String, SimplePrice> = self
            .get(&format!(
                "/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
                self.native_coin_id
            ))
            .await?;
        let entry = prices.get(&self.native_coin_id);

        Ok(PriceTicker {
            price: entry.map(|p| non_negative(p.usd)).unwrap_or(0.0),
            change_24h: entry.map(|p| p.usd_24h_change).unwrap_or(0.0),
        })
    }
}

/// Reads a `[timestamp_ms, price]` pair, skipping anything else.
fn price_point(pair: &Value) -> Option<PricePoint> {
    let pair = pair.as_array()?;
    let timestamp = pair.first()?.as_f64()?;
    let price = pair.get(1)?.as_f64()?;
    (timestamp.is_finite() && price.is_finite()).then(|| PricePoint {
        timestamp: timestamp as i64,
        price: non_negative(price),
    })
}

#[async_trait]
impl PriceOracle for CoingeckoProvider {
    #[instrument(name = "CoingeckoSubnetPrice", skip(self), fields(coin = %self.subnet_coin_id))]
    async fn subnet_price(&self) -> Sourced<PriceSnapshot> {
        or_unavailable(self.fetch_subnet_price().await, "subnet token price")
    }

    #[instrument(name = "CoingeckoTicker", skip(self), fields(coin = %self.native_coin_id))]
    async fn native_ticker(&self) -> Sourced<PriceTicker> {
        or_unavailable(self.fetch_ticker().await, "native token ticker")
    }

    #[instrument(name = "CoingeckoHistory", skip(self), fields(coin = %self.native_coin_id))]
    async fn native_history(&self) -> Sourced<Vec<PricePoint>> {
        or_unavailable(
            self.fetch_history(&self.native_coin_id).await,
            "native token price history",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::TtlCache;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> CoingeckoProvider {
        let http = CachedHttp::new(
            reqwest::Client::new(),
            Arc::new(TtlCache::new(Duration::from_secs(300))),
        );
        CoingeckoProvider::new(&server.uri(), "finetuning", "bittensor", http)
    }

    #[tokio::test]
    async fn test_subnet_price_with_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/finetuning"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"market_data": {
                    "current_price": {"usd": 1.25},
                    "price_change_percentage_24h": 4.5,
                    "price_change_percentage_7d": -2.0,
                    "total_volume": {"usd": 120000},
                    "market_cap": {"usd": 5000000}
                }}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/finetuning/market_chart"))
            .and(query_param("days", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"prices": [[1736899200000, 1.1], [1736985600000, 1.2], ["bad"], [1737072000000, null]]}"#,
            ))
            .mount(&server)
            .await;

        let price = provider(&server).subnet_price().await;
        assert!(!price.degraded);
        assert_eq!(price.value.current, 1.25);
        assert_eq!(price.value.change_24h, 4.5);
        assert_eq!(price.value.change_7d, -2.0);
        assert_eq!(price.value.volume_24h, 120000.0);
        assert_eq!(price.value.market_cap, 5000000.0);
        assert_eq!(
            price.value.history,
            vec![
                PricePoint {
                    timestamp: 1736899200000,
                    price: 1.1
                },
                PricePoint {
                    timestamp: 1736985600000,
                    price: 1.2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_market_data_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/finetuning"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id": "finetuning"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/finetuning/market_chart"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let price = provider(&server).subnet_price().await;
        assert!(!price.degraded);
        assert_eq!(price.value, PriceSnapshot::default());
    }

    #[tokio::test]
    async fn test_native_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bittensor"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"bittensor": {"usd": 401.2, "usd_24h_change": -3.1}}"#,
            ))
            .mount(&server)
            .await;

        let ticker = provider(&server).native_ticker().await;
        assert_eq!(ticker.value.price, 401.2);
        assert_eq!(ticker.value.change_24h, -3.1);
    }

    #[tokio::test]
    async fn test_upstream_error_without_cache_is_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let oracle = provider(&server);
        let ticker = oracle.native_ticker().await;
        assert!(ticker.degraded);
        assert_eq!(ticker.value, PriceTicker::default());

        let history = oracle.native_history().await;
        assert!(history.degraded);
        assert!(history.value.is_empty());
    }
}
