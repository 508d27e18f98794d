use super::ui;
use crate::core::config::AppConfig;
use crate::core::model::DashboardSnapshot;
use crate::dashboard::{Sources, collect_snapshot};
use crate::present::{self, DashboardView, TransactionRow};
use anyhow::Result;
use chrono::Utc;
use comfy_table::Cell;
use tokio::time::MissedTickBehavior;
use tracing::info;

const MAX_ROWS: usize = 10;

fn stats_table(view: &DashboardView) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Metric"),
        ui::header_cell("Value"),
        ui::header_cell("Detail"),
    ]);
    for stat in &view.stats {
        table.add_row(vec![
            Cell::new(&stat.label),
            ui::amount_cell(&stat.value),
            Cell::new(stat.detail.as_deref().unwrap_or("")),
        ]);
    }
    table.to_string()
}

fn wallets_table(view: &DashboardView) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Wallet"),
        ui::header_cell("Address"),
        ui::header_cell("Balance"),
        ui::header_cell("Value (USD)"),
    ]);
    for wallet in &view.wallets {
        table.add_row(vec![
            Cell::new(&wallet.name),
            Cell::new(&wallet.address),
            ui::amount_cell(&wallet.balance),
            ui::amount_cell(&wallet.value),
        ]);
    }
    table.to_string()
}

fn prices_table(snapshot: &DashboardSnapshot) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Token"),
        ui::header_cell("Price"),
        ui::header_cell("24h"),
        ui::header_cell("7d"),
        ui::header_cell("Volume 24h"),
    ]);
    for (name, price) in [("TAO", &snapshot.price), ("Subnet", &snapshot.subnet_price)] {
        table.add_row(vec![
            Cell::new(name),
            ui::amount_cell(&present::format_price(price.current)),
            ui::change_cell(&present::format_percent_change(price.change_24h)),
            ui::change_cell(&present::format_percent_change(price.change_7d)),
            ui::amount_cell(&present::format_compact(price.volume_24h)),
        ]);
    }
    table.to_string()
}

fn expenses_table(view: &DashboardView) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Category"),
        ui::header_cell("Amount"),
        ui::header_cell("Share"),
    ]);
    for slice in &view.categories {
        table.add_row(vec![
            Cell::new(&slice.label),
            ui::amount_cell(&present::format_currency(slice.value)),
            ui::amount_cell(&format!("{:.1}%", slice.percentage)),
        ]);
    }
    table.to_string()
}

fn transactions_table(rows: &[TransactionRow]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Wallet"),
        ui::header_cell("Type"),
        ui::header_cell("Counterparty"),
        ui::header_cell("Amount"),
        ui::header_cell("Value (USD)"),
    ]);
    for row in rows.iter().take(MAX_ROWS) {
        table.add_row(vec![
            Cell::new(&row.date),
            Cell::new(&row.wallet),
            Cell::new(&row.direction),
            Cell::new(&row.counterparty),
            ui::flagged_amount_cell(&row.amount, row.is_large),
            ui::amount_cell(&row.value),
        ]);
    }
    table.to_string()
}

fn trades_table(view: &DashboardView) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Type"),
        ui::header_cell("Coldkey"),
        ui::header_cell("Alpha"),
        ui::header_cell("TAO"),
        ui::header_cell("Value (USD)"),
    ]);
    for trade in view.alpha_trades.iter().take(MAX_ROWS) {
        table.add_row(vec![
            Cell::new(&trade.date),
            Cell::new(&trade.kind),
            Cell::new(&trade.coldkey),
            ui::amount_cell(&trade.alpha),
            ui::flagged_amount_cell(&trade.tao, trade.is_large),
            ui::amount_cell(&trade.value),
        ]);
    }
    table.to_string()
}

fn section(output: &mut String, title: &str, body: String) {
    output.push_str(&format!(
        "\n\n{}\n\n{}",
        ui::style_text(title, ui::StyleType::Title),
        body
    ));
}

/// Renders a snapshot as terminal tables.
pub fn render(snapshot: &DashboardSnapshot, subnet_name: &str) -> String {
    let view = DashboardView::from_snapshot(snapshot);

    let mut output = format!(
        "Treasury: {}  {}",
        ui::style_text(subnet_name, ui::StyleType::Title),
        ui::style_text(&format!("updated {}", view.last_updated), ui::StyleType::Subtle)
    );
    section(&mut output, "Overview", stats_table(&view));
    section(&mut output, "Prices", prices_table(snapshot));
    section(&mut output, "Wallets", wallets_table(&view));
    if !view.categories.is_empty() {
        section(&mut output, "Expenses by Category", expenses_table(&view));
    }
    if !view.transactions.is_empty() {
        section(
            &mut output,
            "Recent Transactions",
            transactions_table(&view.transactions),
        );
    }
    if !view.large_transactions.is_empty() {
        section(
            &mut output,
            "Large Transactions",
            transactions_table(&view.large_transactions),
        );
    }
    if !view.alpha_trades.is_empty() {
        section(&mut output, "Alpha Trades", trades_table(&view));
    }

    output.push_str(&format!(
        "\n\n{}: {}",
        ui::style_text("Total Value (USD)", ui::StyleType::TotalLabel),
        ui::style_text(
            &present::format_currency(snapshot.treasury.total_usd),
            ui::StyleType::TotalValue
        )
    ));
    if !view.degraded_sources.is_empty() {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("Unavailable: {}", view.degraded_sources.join(", ")),
                ui::StyleType::Warning
            )
        ));
    }
    output
}

async fn print_once(sources: &Sources, config: &AppConfig) {
    let spinner = ui::new_spinner("Fetching treasury data...");
    let snapshot = collect_snapshot(sources, config, Utc::now()).await;
    spinner.finish_and_clear();
    println!("{}", render(&snapshot, &config.subnet.name));
}

pub async fn run(sources: &Sources, config: &AppConfig) -> Result<()> {
    print_once(sources, config).await;
    Ok(())
}

/// Re-renders on the configured poll interval until Ctrl-C. A tick that
/// fires while an aggregation is still running is dropped.
pub async fn watch(sources: &Sources, config: &AppConfig) -> Result<()> {
    let mut interval = tokio::time::interval(config.refresh.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval = ?config.refresh.poll_interval(), "Watching treasury");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                ui::print_separator();
                print_once(sources, config).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return Ok(());
            }
        }
    }
}
