//! Display formatting and chart series derived from a snapshot.
//!
//! Everything here is stateless; the same view backs the JSON view endpoint
//! and the terminal summary.
use crate::core::model::{
    BurnSnapshot, CategoryExpense, DashboardSnapshot, Direction, PayorExpense, PricePoint,
    StakePoint, TradeKind,
};
use chrono::{DateTime, Months, NaiveDate};
use num_format::{Locale, ToFormattedString};
use serde::Serialize;

/// Chart colours, cycled by position.
pub const PALETTE: [&str; 6] = [
    "#3b82f6", "#10b981", "#f59e0b", "#ef4444", "#8b5cf6", "#ec4899",
];
/// Actual months kept in the burn chart.
pub const BURN_CHART_MONTHS: usize = 12;
/// Months projected past the last actual month at the current burn.
pub const PROJECTED_MONTHS: u32 = 6;
pub const NO_VALUE: &str = "--";

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// `1234.567` with 2 decimals is `1,234.57`.
pub fn format_number(value: f64, decimals: usize) -> String {
    let value = finite(value);
    let fixed = format!("{:.*}", decimals, value.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };
    let grouped = whole
        .parse::<u128>()
        .map(|n| n.to_formatted_string(&Locale::en))
        .unwrap_or_else(|_| whole.to_string());
    let sign = if value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

/// Whole US dollars: `$1,235`, `-$50`.
pub fn format_currency(value: f64) -> String {
    let formatted = format_number(value, 0);
    match formatted.strip_prefix('-') {
        Some(rest) => format!("-${rest}"),
        None => format!("${formatted}"),
    }
}

/// Dollars with cents, for token prices.
pub fn format_price(value: f64) -> String {
    let formatted = format_number(value, 2);
    match formatted.strip_prefix('-') {
        Some(rest) => format!("-${rest}"),
        None => format!("${formatted}"),
    }
}

/// Abbreviated dollars: `$1.2K`, `$3.4M`, `$5.0B`.
pub fn format_compact(value: f64) -> String {
    let value = finite(value);
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{sign}${:.1}B", abs / 1e9)
    } else if abs >= 1e6 {
        format!("{sign}${:.1}M", abs / 1e6)
    } else if abs >= 1e3 {
        format!("{sign}${:.1}K", abs / 1e3)
    } else {
        format_currency(value)
    }
}

/// Signed percentage with two decimals: `+1.23%`.
pub fn format_percent_change(value: f64) -> String {
    let value = finite(value);
    if value >= 0.0 {
        format!("+{value:.2}%")
    } else {
        format!("{value:.2}%")
    }
}

pub fn runway_text(months: f64, infinite: bool) -> String {
    if infinite {
        "Infinite".to_string()
    } else if !months.is_finite() || months <= 0.0 {
        NO_VALUE.to_string()
    } else if months > 120.0 {
        "10+ years".to_string()
    } else if months > 12.0 {
        format!("{:.1} years", months / 12.0)
    } else {
        format!("{months:.1} months")
    }
}

/// `5DXqqd...eW4j` for long addresses.
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.is_empty() {
        "Unknown".to_string()
    } else if chars.len() <= 12 {
        address.to_string()
    } else {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

fn month_start(month: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").ok()
}

/// `2025-01` is `Jan 25`. Unrecognized input is returned as is.
pub fn format_month(month: &str) -> String {
    month_start(month)
        .map(|d| d.format("%b %y").to_string())
        .unwrap_or_else(|| month.to_string())
}

/// Milliseconds since the epoch as `Jan 15, 2025` (UTC).
pub fn format_timestamp(millis: i64) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(dt) if millis > 0 => dt.format("%b %-d, %Y").to_string(),
        _ => NO_VALUE.to_string(),
    }
}

pub fn color_for(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: i64,
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnChartPoint {
    pub month: String,
    pub label: String,
    pub burn: f64,
    pub cumulative: f64,
    pub projected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub label: String,
    pub value: f64,
    pub percentage: f64,
    pub color: &'static str,
}

pub fn price_series(history: &[PricePoint]) -> Vec<ChartPoint> {
    history
        .iter()
        .map(|p| ChartPoint {
            timestamp: p.timestamp,
            label: format_timestamp(p.timestamp),
            value: p.price,
        })
        .collect()
}

pub fn stake_series(history: &[StakePoint]) -> Vec<ChartPoint> {
    history
        .iter()
        .map(|p| ChartPoint {
            timestamp: p.timestamp,
            label: format_timestamp(p.timestamp),
            value: p.amount,
        })
        .collect()
}

/// The last actual burn months followed by months projected at the current
/// monthly burn, with the cumulative total carried on.
pub fn burn_series(burn: &BurnSnapshot) -> Vec<BurnChartPoint> {
    let history = &burn.burn_history;
    let skip = history.len().saturating_sub(BURN_CHART_MONTHS);
    let mut series: Vec<BurnChartPoint> = history[skip..]
        .iter()
        .map(|p| BurnChartPoint {
            month: p.month.clone(),
            label: format_month(&p.month),
            burn: p.burn,
            cumulative: p.cumulative_burn,
            projected: false,
        })
        .collect();

    let Some(last) = history.last() else {
        return series;
    };
    let Some(start) = month_start(&last.month) else {
        return series;
    };

    let mut cumulative = last.cumulative_burn;
    for offset in 1..=PROJECTED_MONTHS {
        let Some(date) = start.checked_add_months(Months::new(offset)) else {
            break;
        };
        cumulative += burn.monthly_burn;
        let month = date.format("%Y-%m").to_string();
        series.push(BurnChartPoint {
            label: format_month(&month),
            month,
            burn: burn.monthly_burn,
            cumulative,
            projected: true,
        });
    }
    series
}

pub fn category_slices(categories: &[CategoryExpense]) -> Vec<Slice> {
    categories
        .iter()
        .enumerate()
        .map(|(i, c)| Slice {
            label: c.category.clone(),
            value: c.amount,
            percentage: c.percentage,
            color: color_for(i),
        })
        .collect()
}

pub fn payor_slices(payors: &[PayorExpense]) -> Vec<Slice> {
    payors
        .iter()
        .enumerate()
        .map(|(i, p)| Slice {
            label: p.payor.clone(),
            value: p.amount,
            percentage: p.percentage,
            color: color_for(i),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    pub label: String,
    pub value: String,
    pub detail: Option<String>,
}

impl Stat {
    fn new(label: &str, value: String, detail: Option<String>) -> Self {
        Stat {
            label: label.to_string(),
            value,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRow {
    pub name: String,
    pub address: String,
    pub balance: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub date: String,
    pub wallet: String,
    pub direction: String,
    pub counterparty: String,
    pub amount: String,
    pub value: String,
    pub is_large: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRow {
    pub date: String,
    pub kind: String,
    pub coldkey: String,
    pub alpha: String,
    pub tao: String,
    pub value: String,
    pub is_large: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRow {
    pub date: String,
    pub payor: String,
    pub item: String,
    pub category: String,
    pub cost: String,
}

/// Presentation-ready form of a [`DashboardSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub last_updated: String,
    pub stats: Vec<Stat>,
    pub wallets: Vec<WalletRow>,
    pub price_series: Vec<ChartPoint>,
    pub subnet_price_series: Vec<ChartPoint>,
    pub stake_series: Vec<ChartPoint>,
    pub burn_series: Vec<BurnChartPoint>,
    pub categories: Vec<Slice>,
    pub payors: Vec<Slice>,
    pub transactions: Vec<TransactionRow>,
    pub large_transactions: Vec<TransactionRow>,
    pub alpha_trades: Vec<TradeRow>,
    pub recent_expenses: Vec<ExpenseRow>,
    pub degraded_sources: Vec<String>,
}

fn tokens(amount: f64, token: &str) -> String {
    format!("{} {token}", format_number(amount, 2))
}

fn transaction_rows(transactions: &[crate::core::model::Transaction]) -> Vec<TransactionRow> {
    transactions
        .iter()
        .map(|tx| {
            let (direction, counterparty) = match tx.direction {
                Direction::Send => ("Sent", &tx.to),
                Direction::Receive => ("Received", &tx.from),
            };
            TransactionRow {
                date: format_timestamp(tx.timestamp),
                wallet: tx.wallet.clone(),
                direction: direction.to_string(),
                counterparty: shorten_address(counterparty),
                amount: tokens(tx.amount, "TAO"),
                value: format_currency(tx.amount_usd),
                is_large: tx.is_large,
            }
        })
        .collect()
}

impl DashboardView {
    pub fn from_snapshot(snapshot: &DashboardSnapshot) -> Self {
        let treasury = &snapshot.treasury;
        let staking = &snapshot.staking;
        let burn = &snapshot.burn_rate;

        let rank = if staking.validator_rank > 0 {
            format!("#{}", staking.validator_rank)
        } else {
            NO_VALUE.to_string()
        };

        let stats = vec![
            Stat::new(
                "Treasury Value",
                format_currency(treasury.total_usd),
                Some(format!(
                    "{} / {}",
                    tokens(treasury.total_tao, "TAO"),
                    tokens(treasury.total_eth, "ETH")
                )),
            ),
            Stat::new(
                "TAO Price",
                format_price(snapshot.price.current),
                Some(format!(
                    "{} 24h, {} 7d",
                    format_percent_change(snapshot.price.change_24h),
                    format_percent_change(snapshot.price.change_7d)
                )),
            ),
            Stat::new(
                "Subnet Token",
                format_price(snapshot.subnet_price.current),
                Some(format!(
                    "{} 24h, {} market cap",
                    format_percent_change(snapshot.subnet_price.change_24h),
                    format_compact(snapshot.subnet_price.market_cap)
                )),
            ),
            Stat::new(
                "Monthly Burn",
                format_currency(burn.monthly_burn_usd),
                (burn.recurring_monthly > 0.0)
                    .then(|| format!("{} recurring", format_currency(burn.recurring_monthly))),
            ),
            Stat::new(
                "Runway",
                runway_text(burn.runway_months, burn.runway_infinite),
                None,
            ),
            Stat::new(
                "Total Delegated",
                tokens(staking.total_delegated, "TAO"),
                Some(format!(
                    "{} from {} stakers",
                    format_compact(staking.total_delegated_usd),
                    format_number(staking.staker_count as f64, 0)
                )),
            ),
            Stat::new("Validator Rank", rank, None),
            Stat::new("APY", format!("{:.2}%", finite(staking.apy)), None),
        ];

        DashboardView {
            last_updated: format_timestamp(snapshot.last_updated),
            stats,
            wallets: treasury
                .wallets
                .iter()
                .map(|w| WalletRow {
                    name: w.name.clone(),
                    address: shorten_address(&w.address),
                    balance: tokens(w.balance, &w.token),
                    value: format_currency(w.balance_usd),
                })
                .collect(),
            price_series: price_series(&snapshot.price.history),
            subnet_price_series: price_series(&snapshot.subnet_price.history),
            stake_series: stake_series(&staking.stake_history),
            burn_series: burn_series(burn),
            categories: category_slices(&burn.expenses_by_category),
            payors: payor_slices(&burn.expenses_by_payor),
            transactions: transaction_rows(&snapshot.transactions),
            large_transactions: transaction_rows(&snapshot.large_transactions),
            alpha_trades: snapshot
                .alpha_trades
                .iter()
                .map(|t| TradeRow {
                    date: format_timestamp(t.timestamp),
                    kind: match t.kind {
                        TradeKind::Stake => "Stake",
                        TradeKind::Unstake => "Unstake",
                    }
                    .to_string(),
                    coldkey: shorten_address(&t.coldkey),
                    alpha: format_number(t.alpha_amount, 2),
                    tao: tokens(t.tao_amount, "TAO"),
                    value: format_currency(t.usd_value),
                    is_large: t.is_large,
                })
                .collect(),
            recent_expenses: burn
                .recent_expenses
                .iter()
                .map(|e| ExpenseRow {
                    date: e.date.clone(),
                    payor: e.payor.clone(),
                    item: e.item.clone(),
                    category: e.category.clone(),
                    cost: format_currency(e.cost),
                })
                .collect(),
            degraded_sources: snapshot.degraded_sources.clone(),
        }
    }
}
