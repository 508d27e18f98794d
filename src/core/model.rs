//! Read-model records produced by one dashboard aggregation.
//!
//! Every record is a plain value rebuilt from scratch on each aggregation and
//! serialized as camelCase JSON for the browser client.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub const RAO_PER_TAO: f64 = 1e9;
pub const WEI_PER_ETH: f64 = 1e18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Bittensor,
    Ethereum,
}

impl Network {
    pub fn token(&self) -> &'static str {
        match self {
            Network::Bittensor => "TAO",
            Network::Ethereum => "ETH",
        }
    }

    /// Number of indivisible base units in one token.
    pub fn base_units(&self) -> f64 {
        match self {
            Network::Bittensor => RAO_PER_TAO,
            Network::Ethereum => WEI_PER_ETH,
        }
    }

    /// Converts a raw base-unit amount (rao, wei) into whole tokens.
    pub fn to_tokens(&self, raw: f64) -> f64 {
        raw / self.base_units()
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Bittensor => write!(f, "bittensor"),
            Network::Ethereum => write!(f, "ethereum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub name: String,
    pub address: String,
    pub network: Network,
    pub balance: f64,
    #[serde(rename = "balanceUSD")]
    pub balance_usd: f64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasuryOverview {
    #[serde(rename = "totalTAO")]
    pub total_tao: f64,
    #[serde(rename = "totalETH")]
    pub total_eth: f64,
    #[serde(rename = "totalUSD")]
    pub total_usd: f64,
    pub change_24h: f64,
    pub change_7d: f64,
    pub change_30d: f64,
    pub wallets: Vec<WalletBalance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PricePoint {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub current: f64,
    pub change_24h: f64,
    pub change_7d: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub history: Vec<PricePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTicker {
    pub price: f64,
    pub change_24h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StakePoint {
    pub timestamp: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingSnapshot {
    pub total_delegated: f64,
    #[serde(rename = "totalDelegatedUSD")]
    pub total_delegated_usd: f64,
    pub staker_count: u64,
    pub validator_rank: u32,
    pub apy: f64,
    pub stake_history: Vec<StakePoint>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    /// Date exactly as written in the sheet.
    pub date: String,
    pub payor: String,
    pub item: String,
    pub category: String,
    pub cost: f64,
    pub recurring: bool,
    pub annualized: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryExpense {
    pub category: String,
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayorExpense {
    pub payor: String,
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnPoint {
    /// Calendar month as `YYYY-MM`.
    pub month: String,
    pub burn: f64,
    pub cumulative_burn: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_runway_months: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnSnapshot {
    pub monthly_burn: f64,
    #[serde(rename = "monthlyBurnUSD")]
    pub monthly_burn_usd: f64,
    pub recurring_monthly: f64,
    pub runway_months: f64,
    pub runway_infinite: bool,
    pub expenses_by_category: Vec<CategoryExpense>,
    pub expenses_by_payor: Vec<PayorExpense>,
    pub recent_expenses: Vec<Expense>,
    pub burn_history: Vec<BurnPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    #[default]
    Receive,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub amount: f64,
    #[serde(rename = "amountUSD")]
    pub amount_usd: f64,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub is_large: bool,
    /// Name of the monitored wallet this transfer was found under.
    pub wallet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    #[default]
    Stake,
    Unstake,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlphaTrade {
    pub extrinsic_id: String,
    pub timestamp: i64,
    pub coldkey: String,
    pub hotkey: String,
    #[serde(rename = "type")]
    pub kind: TradeKind,
    pub alpha_amount: f64,
    pub tao_amount: f64,
    pub usd_value: f64,
    pub is_large: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub treasury: TreasuryOverview,
    pub price: PriceSnapshot,
    pub subnet_price: PriceSnapshot,
    pub tao_price_ticker: PriceTicker,
    pub staking: StakingSnapshot,
    pub burn_rate: BurnSnapshot,
    pub transactions: Vec<Transaction>,
    pub large_transactions: Vec<Transaction>,
    pub alpha_trades: Vec<AlphaTrade>,
    /// Sections that fell back to zero/empty values in this aggregation.
    pub degraded_sources: Vec<String>,
    pub last_updated: i64,
}

/// A normalized record returned across an adapter boundary.
///
/// `degraded` is set when the value is a zero/empty fallback, so a reader
/// can tell a real zero balance from an unavailable source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Sourced<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn partial(value: T, degraded: bool) -> Self {
        Self { value, degraded }
    }
}

impl<T: Default> Sourced<T> {
    pub fn unavailable() -> Self {
        Self {
            value: T::default(),
            degraded: true,
        }
    }
}
