//! Pure derivations over normalized source records.
//!
//! Nothing in here performs I/O; the dashboard collects the inputs and these
//! functions turn them into the treasury, burn and runway sections.
use crate::core::model::{
    BurnPoint, BurnSnapshot, CategoryExpense, Expense, Network, PayorExpense, PriceSnapshot,
    TreasuryOverview, WalletBalance,
};
use chrono::{Datelike, Months, NaiveDate};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Runway reported when nothing is being spent.
pub const RUNWAY_CAP_MONTHS: f64 = 999.0;
/// Number of whole months averaged into the monthly burn.
pub const BURN_WINDOW_MONTHS: u32 = 3;
pub const RECENT_EXPENSES: usize = 10;

/// Picks the single native token price used across one snapshot.
///
/// The indexer is authoritative; the oracle ticker covers for it when the
/// indexer has no price.
pub fn resolve_native_price(indexer_price: f64, ticker_price: f64) -> f64 {
    [indexer_price, ticker_price]
        .into_iter()
        .find(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(0.0)
}

/// Values every wallet at its network's rate and sums the totals.
pub fn treasury_overview(
    wallets: Vec<WalletBalance>,
    native_price: f64,
    eth_price: f64,
    price: &PriceSnapshot,
) -> TreasuryOverview {
    let mut overview = TreasuryOverview {
        change_24h: price.change_24h,
        change_7d: price.change_7d,
        ..Default::default()
    };

    for mut wallet in wallets {
        let rate = match wallet.network {
            Network::Bittensor => native_price,
            Network::Ethereum => eth_price,
        };
        wallet.balance_usd = wallet.balance * rate;
        match wallet.network {
            Network::Bittensor => overview.total_tao += wallet.balance,
            Network::Ethereum => overview.total_eth += wallet.balance,
        }
        overview.total_usd += wallet.balance_usd;
        overview.wallets.push(wallet);
    }

    overview
}

/// Parses a sheet date: `YYYY-MM-DD`, `MM/DD/YYYY` or `YYYY-MM`.
pub fn parse_expense_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%m/%d/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{date}-01"), "%Y-%m-%d"))
        .ok()
}

/// Derives the burn section from the expense ledger.
///
/// Monthly burn averages the last `BURN_WINDOW_MONTHS` calendar months
/// (including the current one) and never drops below the configured
/// recurring schedule. Runway is left for [`with_runway`].
pub fn burn_snapshot(
    expenses: &[Expense],
    today: NaiveDate,
    recurring_monthly: f64,
) -> BurnSnapshot {
    let window_start = today
        .with_day(1)
        .and_then(|first| first.checked_sub_months(Months::new(BURN_WINDOW_MONTHS)))
        .unwrap_or(today);

    let mut window_total = 0.0;
    let mut total = 0.0;
    let mut by_category: HashMap<&str, f64> = HashMap::new();
    let mut by_payor: HashMap<&str, f64> = HashMap::new();
    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();

    for expense in expenses {
        total += expense.cost;
        *by_category.entry(expense.category.as_str()).or_default() += expense.cost;
        *by_payor.entry(expense.payor.as_str()).or_default() += expense.cost;

        if let Some(date) = parse_expense_date(&expense.date) {
            if date >= window_start {
                window_total += expense.cost;
            }
            *by_month.entry(date.format("%Y-%m").to_string()).or_default() += expense.cost;
        }
    }

    let trailing = window_total / BURN_WINDOW_MONTHS as f64;
    let monthly_burn = trailing.max(recurring_monthly.max(0.0));
    debug!(trailing, recurring_monthly, monthly_burn, "Computed monthly burn");

    let mut cumulative = 0.0;
    let burn_history = by_month
        .into_iter()
        .map(|(month, burn)| {
            cumulative += burn;
            BurnPoint {
                month,
                burn,
                cumulative_burn: cumulative,
                projected_runway_months: None,
            }
        })
        .collect();

    BurnSnapshot {
        monthly_burn,
        monthly_burn_usd: monthly_burn,
        recurring_monthly: recurring_monthly.max(0.0),
        runway_months: 0.0,
        runway_infinite: false,
        expenses_by_category: shares(by_category, total)
            .into_iter()
            .map(|(category, amount, percentage)| CategoryExpense {
                category,
                amount,
                percentage,
            })
            .collect(),
        expenses_by_payor: shares(by_payor, total)
            .into_iter()
            .map(|(payor, amount, percentage)| PayorExpense {
                payor,
                amount,
                percentage,
            })
            .collect(),
        recent_expenses: expenses.iter().rev().take(RECENT_EXPENSES).cloned().collect(),
        burn_history,
    }
}

/// Sorts group totals by amount (descending, ties by name) with their share
/// of `total` in percent.
fn shares(groups: HashMap<&str, f64>, total: f64) -> Vec<(String, f64, f64)> {
    let mut shares: Vec<(String, f64, f64)> = groups
        .into_iter()
        .map(|(name, amount)| {
            let percentage = if total > 0.0 {
                amount / total * 100.0
            } else {
                0.0
            };
            (name.to_string(), amount, percentage)
        })
        .collect();
    shares.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    shares
}

/// Months of runway left, and whether it is unbounded.
///
/// Never NaN or infinite: without burn the cap is returned with the flag set.
pub fn runway(total_usd: f64, monthly_burn: f64) -> (f64, bool) {
    if monthly_burn.is_finite() && monthly_burn > 0.0 {
        let total = if total_usd.is_finite() { total_usd.max(0.0) } else { 0.0 };
        (total / monthly_burn, false)
    } else {
        (RUNWAY_CAP_MONTHS, true)
    }
}

/// Fills in runway and marks the projection on the latest burn month.
pub fn with_runway(mut burn: BurnSnapshot, total_usd: f64) -> BurnSnapshot {
    let (months, infinite) = runway(total_usd, burn.monthly_burn);
    burn.runway_months = months;
    burn.runway_infinite = infinite;

    let last = burn.burn_history.len().saturating_sub(1);
    for (i, point) in burn.burn_history.iter_mut().enumerate() {
        point.projected_runway_months = (i == last).then_some(months);
    }
    burn
}

/// Drops entries with empty or repeated identifiers and orders the rest by
/// timestamp, newest first. The first occurrence of an identifier wins.
pub fn dedupe_newest_first<T>(
    items: Vec<T>,
    id: impl Fn(&T) -> &str,
    timestamp: impl Fn(&T) -> i64,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut unique: Vec<T> = items
        .into_iter()
        .filter(|item| {
            let key = id(item);
            !key.is_empty() && seen.insert(key.to_string())
        })
        .collect();
    unique.sort_by_key(|item| std::cmp::Reverse(timestamp(item)));
    unique
}
