use super::util::{CachedHttp, non_negative, or_unavailable, parse_amount};
use crate::core::model::{Expense, Sourced};
use crate::core::sources::ExpenseSource;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, instrument, warn};

const UNKNOWN: &str = "Unknown";
const OTHER: &str = "Other";

/// Keyword rules for expense categories, first match wins.
const CATEGORY_RULES: &[(&str, &[&str])] = &[
    ("Personnel", &["cto", "contractor", "salary"]),
    (
        "Software",
        &["google", "notion", "lucid", "docusign", "subscription"],
    ),
    (
        "Marketing",
        &["brand", "design", "graphics", "marketing", "website"],
    ),
    ("Events & Training", &["conference", "event", "coaching"]),
    ("HR & Recruiting", &["bonus", "recruiting"]),
];

/// Expense ledger read from a spreadsheet's CSV export.
pub struct SheetsProvider {
    url: Option<String>,
    http: CachedHttp,
}

impl SheetsProvider {
    /// `url` is the CSV export location; `None` when no sheet is configured.
    pub fn new(url: Option<String>, http: CachedHttp) -> Self {
        if url.is_none() {
            warn!("No expenses sheet configured, burn rate will be 0");
        }
        Self { url, http }
    }

    async fn fetch_expenses(&self) -> Result<Vec<Expense>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("No expenses sheet configured"))?;
        let body = self
            .http
            .get_text(url, self.http.client().get(url))
            .await?;
        let expenses = parse_expenses(&body)?;
        debug!(rows = expenses.len(), "Parsed expense sheet");
        Ok(expenses)
    }
}

/// Parses the expense sheet CSV. Rows without a date or cost are skipped.
pub fn parse_expenses(body: &str) -> Result<Vec<Expense>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read expense sheet header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let columns = Columns {
        date: column("date"),
        payor: column("payor"),
        item: column("item"),
        cost: column("cost"),
        recurring: column("recurring"),
        annualized: column("annualized").or_else(|| column("annual")),
    };

    let mut expenses = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable expense row");
                continue;
            }
        };
        if let Some(expense) = columns.expense(&record) {
            expenses.push(expense);
        }
    }
    Ok(expenses)
}

struct Columns {
    date: Option<usize>,
    payor: Option<usize>,
    item: Option<usize>,
    cost: Option<usize>,
    recurring: Option<usize>,
    annualized: Option<usize>,
}

impl Columns {
    fn expense(&self, record: &StringRecord) -> Option<Expense> {
        let field = |index: Option<usize>| {
            index
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let date = field(self.date)?;
        let cost = non_negative(parse_amount(field(self.cost)?));
        let item = field(self.item).unwrap_or(UNKNOWN);
        let recurring = field(self.recurring)
            .map(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let annualized = match field(self.annualized).map(parse_amount) {
            Some(value) if value > 0.0 => non_negative(value),
            _ if recurring => cost * 12.0,
            _ => 0.0,
        };

        Some(Expense {
            date: date.to_string(),
            payor: field(self.payor).unwrap_or(UNKNOWN).to_string(),
            item: item.to_string(),
            category: categorize(item).to_string(),
            cost,
            recurring,
            annualized,
        })
    }
}

/// Maps an expense item description to its reporting category.
pub fn categorize(item: &str) -> &'static str {
    let item = item.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| item.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(OTHER)
}

#[async_trait]
impl ExpenseSource for SheetsProvider {
    #[instrument(name = "SheetsExpenses", skip(self))]
    async fn expenses(&self) -> Sourced<Vec<Expense>> {
        or_unavailable(self.fetch_expenses().await, "expenses")
    }
}
