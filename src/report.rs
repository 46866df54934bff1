// 📈 Reports - monthly totals, summary statistics, unusual amounts, weekly trends
//
// Everything here reads the categorized table, either straight from the
// pipeline or back from the SQLite/CSV output.

use crate::categorize::CategorizedTransaction;
use crate::output::OutputRecord;
use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Standard deviations above the mean absolute amount that count as unusual
pub const DEFAULT_UNUSUAL_MULTIPLIER: f64 = 3.0;

const SHORT_WINDOW_WEEKS: usize = 4;
const LONG_WINDOW_WEEKS: usize = 12;

/// The slice of a categorized record the reports look at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movement {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub counterparty_name: String,
    pub category: String,
    pub subcategory: String,
}

impl Movement {
    fn abs_amount(&self) -> f64 {
        self.amount.abs().to_f64().unwrap_or(0.0)
    }
}

impl From<&CategorizedTransaction> for Movement {
    fn from(record: &CategorizedTransaction) -> Self {
        let tx = &record.transaction;
        Movement {
            transaction_id: tx.id_str().to_string(),
            date: tx.date,
            amount: tx.amount,
            description: tx.description.clone(),
            counterparty_name: tx.counterparty_name.clone(),
            category: record.category().to_string(),
            subcategory: record.subcategory().to_string(),
        }
    }
}

impl TryFrom<&OutputRecord> for Movement {
    type Error = anyhow::Error;

    fn try_from(row: &OutputRecord) -> Result<Self> {
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("{} line {}: bad date '{}'", row.source_file, row.line_number, row.date))?;
        let amount = Decimal::from_str(&row.amount)
            .with_context(|| format!("{} line {}: bad amount '{}'", row.source_file, row.line_number, row.amount))?;

        Ok(Movement {
            transaction_id: row.transaction_id.clone(),
            date,
            amount,
            description: row.description.clone(),
            counterparty_name: row.counterparty_name.clone(),
            category: row.category.clone(),
            subcategory: row.subcategory.clone(),
        })
    }
}

/// Convert stored output rows; one unreadable row fails the whole report
pub fn movements_from_output(rows: &[OutputRecord]) -> Result<Vec<Movement>> {
    rows.iter().map(Movement::try_from).collect()
}

pub fn movements_from_records(records: &[CategorizedTransaction]) -> Vec<Movement> {
    records.iter().map(Movement::from).collect()
}

// ============================================================================
// MONTHLY SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    /// `YYYY-MM`
    pub month: String,
    pub transaction_count: usize,
    pub income_count: usize,
    pub expense_count: usize,
    /// Signed sum of every movement in the month
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
    pub total_income: Decimal,
    /// Positive
    pub total_expenses: Decimal,
    pub net_amount: Decimal,
}

/// One row per calendar month that has movements, oldest first
pub fn monthly_summary(movements: &[Movement]) -> Vec<MonthlySummary> {
    let mut months: BTreeMap<(i32, u32), Vec<&Movement>> = BTreeMap::new();
    for m in movements {
        months.entry((m.date.year(), m.date.month())).or_default().push(m);
    }

    let summary: Vec<MonthlySummary> = months
        .into_iter()
        .map(|((year, month), rows)| {
            let total_amount: Decimal = rows.iter().map(|m| m.amount).sum();
            let total_income: Decimal = rows
                .iter()
                .filter(|m| m.amount > Decimal::ZERO)
                .map(|m| m.amount)
                .sum();
            let total_expenses: Decimal = rows
                .iter()
                .filter(|m| m.amount < Decimal::ZERO)
                .map(|m| -m.amount)
                .sum();

            MonthlySummary {
                month: format!("{year:04}-{month:02}"),
                transaction_count: rows.len(),
                income_count: rows.iter().filter(|m| m.amount > Decimal::ZERO).count(),
                expense_count: rows.iter().filter(|m| m.amount < Decimal::ZERO).count(),
                total_amount,
                avg_amount: (total_amount / Decimal::from(rows.len())).round_dp(2),
                total_income,
                total_expenses,
                net_amount: total_income - total_expenses,
            }
        })
        .collect();

    log::info!("monthly summary covers {} months", summary.len());
    summary
}

// ============================================================================
// SUMMARY STATISTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_transactions: usize,
    pub total_income: Decimal,
    /// Positive
    pub total_expenses: Decimal,
    pub net_amount: Decimal,
    pub avg_transaction: Decimal,
    pub largest_expense: Option<Movement>,
    pub largest_income: Option<Movement>,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub analysis_period_days: i64,
}

/// Overall totals; `None` for an empty table
pub fn summary_stats(movements: &[Movement]) -> Option<SummaryStats> {
    let date_range_start = movements.iter().map(|m| m.date).min()?;
    let date_range_end = movements.iter().map(|m| m.date).max()?;

    let total_income: Decimal = movements
        .iter()
        .filter(|m| m.amount > Decimal::ZERO)
        .map(|m| m.amount)
        .sum();
    let total_expenses: Decimal = movements
        .iter()
        .filter(|m| m.amount < Decimal::ZERO)
        .map(|m| -m.amount)
        .sum();
    let total: Decimal = movements.iter().map(|m| m.amount).sum();

    Some(SummaryStats {
        total_transactions: movements.len(),
        total_income,
        total_expenses,
        net_amount: total_income - total_expenses,
        avg_transaction: (total / Decimal::from(movements.len())).round_dp(2),
        largest_expense: movements
            .iter()
            .filter(|m| m.amount < Decimal::ZERO)
            .min_by_key(|m| m.amount)
            .cloned(),
        largest_income: movements
            .iter()
            .filter(|m| m.amount > Decimal::ZERO)
            .max_by_key(|m| m.amount)
            .cloned(),
        date_range_start,
        date_range_end,
        analysis_period_days: (date_range_end - date_range_start).num_days(),
    })
}

// ============================================================================
// UNUSUAL TRANSACTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnusualReport {
    pub mean_abs_amount: f64,
    /// Sample standard deviation of the absolute amounts
    pub std_dev: f64,
    pub threshold: f64,
    /// Largest absolute amount first
    pub transactions: Vec<Movement>,
}

/// Movements whose absolute amount exceeds `mean + multiplier * std_dev`.
///
/// Fewer than two movements carry no spread, so nothing is flagged.
pub fn find_unusual_transactions(movements: &[Movement], multiplier: f64) -> UnusualReport {
    if movements.len() < 2 {
        return UnusualReport::default();
    }

    let amounts: Vec<f64> = movements.iter().map(Movement::abs_amount).collect();
    let n = amounts.len() as f64;
    let mean = amounts.iter().sum::<f64>() / n;
    let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    let threshold = mean + multiplier * std_dev;

    let mut unusual: Vec<&Movement> = movements
        .iter()
        .filter(|m| m.abs_amount() > threshold)
        .collect();
    unusual.sort_by(|left, right| {
        right
            .abs_amount()
            .total_cmp(&left.abs_amount())
            .then_with(|| left.date.cmp(&right.date))
            .then_with(|| left.transaction_id.cmp(&right.transaction_id))
    });

    log::info!(
        "found {} unusual transactions above threshold {:.2}",
        unusual.len(),
        threshold
    );

    UnusualReport {
        mean_abs_amount: round_to(mean, 2),
        std_dev: round_to(std_dev, 2),
        threshold: round_to(threshold, 2),
        transactions: unusual.into_iter().cloned().collect(),
    }
}

// ============================================================================
// SPENDING TRENDS
// ============================================================================

/// Expenses of one Monday-to-Sunday week
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySpending {
    pub week_start: NaiveDate,
    pub weekly_total: Decimal,
    pub weekly_avg: Decimal,
    pub weekly_count: usize,
    /// Mean weekly total over this and up to 3 preceding listed weeks
    pub rolling_4w_avg: Decimal,
    /// Mean weekly total over this and up to 11 preceding listed weeks
    pub rolling_12w_avg: Decimal,
}

/// Weekly expense totals with rolling averages, oldest week first.
/// Weeks without expenses are not listed and do not count toward windows.
pub fn spending_trends(movements: &[Movement]) -> Vec<WeeklySpending> {
    let mut weeks: BTreeMap<NaiveDate, (Decimal, usize)> = BTreeMap::new();
    for m in movements.iter().filter(|m| m.amount < Decimal::ZERO) {
        let offset = Days::new(u64::from(m.date.weekday().num_days_from_monday()));
        let week_start = m.date.checked_sub_days(offset).unwrap_or(m.date);
        let entry = weeks.entry(week_start).or_insert((Decimal::ZERO, 0));
        entry.0 += -m.amount;
        entry.1 += 1;
    }

    let totals: Vec<Decimal> = weeks.values().map(|(total, _)| *total).collect();
    weeks
        .into_iter()
        .enumerate()
        .map(|(i, (week_start, (weekly_total, weekly_count)))| WeeklySpending {
            week_start,
            weekly_total,
            weekly_avg: (weekly_total / Decimal::from(weekly_count)).round_dp(2),
            weekly_count,
            rolling_4w_avg: rolling_mean(&totals, i, SHORT_WINDOW_WEEKS),
            rolling_12w_avg: rolling_mean(&totals, i, LONG_WINDOW_WEEKS),
        })
        .collect()
}

fn rolling_mean(values: &[Decimal], end: usize, window: usize) -> Decimal {
    let start = (end + 1).saturating_sub(window);
    let slice = &values[start..=end];
    (slice.iter().copied().sum::<Decimal>() / Decimal::from(slice.len())).round_dp(2)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(id: &str, date: &str, amount: &str, description: &str) -> Movement {
        Movement {
            transaction_id: id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            amount: Decimal::from_str(amount).unwrap(),
            description: description.to_string(),
            counterparty_name: String::new(),
            category: "unknown".to_string(),
            subcategory: "unknown".to_string(),
        }
    }

    fn sample() -> Vec<Movement> {
        vec![
            movement("TXN_1", "2023-01-01", "1000", "Salary"),
            movement("TXN_2", "2023-01-15", "-50", "Grocery Store"),
            movement("TXN_3", "2023-02-01", "1500", "Bonus"),
            movement("TXN_4", "2023-02-15", "-75", "Gas Station"),
        ]
    }

    #[test]
    fn test_monthly_summary() {
        let summary = monthly_summary(&sample());
        assert_eq!(summary.len(), 2);

        let jan = &summary[0];
        assert_eq!(jan.month, "2023-01");
        assert_eq!(jan.transaction_count, 2);
        assert_eq!((jan.income_count, jan.expense_count), (1, 1));
        assert_eq!(jan.total_income, Decimal::from(1000));
        assert_eq!(jan.total_expenses, Decimal::from(50));
        assert_eq!(jan.net_amount, Decimal::from(950));
        assert_eq!(jan.avg_amount, Decimal::from(475));

        assert_eq!(summary[1].month, "2023-02");
        assert_eq!(summary[1].net_amount, Decimal::from(1425));
    }

    #[test]
    fn test_summary_stats() {
        let stats = summary_stats(&sample()).unwrap();
        assert_eq!(stats.total_transactions, 4);
        assert_eq!(stats.total_income, Decimal::from(2500));
        assert_eq!(stats.total_expenses, Decimal::from(125));
        assert_eq!(stats.net_amount, Decimal::from(2375));
        assert_eq!(stats.avg_transaction, Decimal::from_str("593.75").unwrap());
        assert_eq!(stats.largest_expense.unwrap().description, "Gas Station");
        assert_eq!(stats.largest_income.unwrap().description, "Bonus");
        assert_eq!(stats.date_range_start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(stats.analysis_period_days, 45);

        assert!(summary_stats(&[]).is_none());
    }

    #[test]
    fn test_unusual_transactions() {
        let mut rows: Vec<Movement> = (1..=20)
            .map(|day| movement(&format!("TXN_{day}"), &format!("2024-03-{day:02}"), "-10", "Koffie"))
            .collect();
        rows.push(movement("TXN_BIG", "2024-03-21", "-1000", "Laptop"));

        let report = find_unusual_transactions(&rows, DEFAULT_UNUSUAL_MULTIPLIER);
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].transaction_id, "TXN_BIG");
        assert!(report.threshold > 10.0 && report.threshold < 1000.0);

        // Income counts by absolute amount too; only the bonus clears half a sigma
        let report = find_unusual_transactions(&sample(), 0.5);
        let flagged: Vec<&str> = report.transactions.iter().map(|m| m.description.as_str()).collect();
        assert_eq!(flagged, vec!["Bonus"]);
    }

    #[test]
    fn test_unusual_needs_two_rows() {
        let single = vec![movement("TXN_1", "2024-03-01", "-5000", "Auto")];
        assert!(find_unusual_transactions(&single, 0.0).transactions.is_empty());
        assert!(find_unusual_transactions(&[], 3.0).transactions.is_empty());
    }

    #[test]
    fn test_spending_trends() {
        let mut rows = sample();
        rows.push(movement("TXN_5", "2023-02-13", "-25", "Bakker"));

        let trends = spending_trends(&rows);
        assert_eq!(trends.len(), 2);

        // 2023-01-15 is a Sunday; its week starts Monday 2023-01-09
        assert_eq!(trends[0].week_start, NaiveDate::from_ymd_opt(2023, 1, 9).unwrap());
        assert_eq!(trends[0].weekly_total, Decimal::from(50));
        assert_eq!(trends[0].rolling_4w_avg, Decimal::from(50));

        assert_eq!(trends[1].week_start, NaiveDate::from_ymd_opt(2023, 2, 13).unwrap());
        assert_eq!(trends[1].weekly_total, Decimal::from(100));
        assert_eq!(trends[1].weekly_count, 2);
        assert_eq!(trends[1].weekly_avg, Decimal::from(50));
        assert_eq!(trends[1].rolling_4w_avg, Decimal::from(75));
        assert_eq!(trends[1].rolling_12w_avg, Decimal::from(75));
    }

    #[test]
    fn test_movements_from_output_rows() {
        let row = OutputRecord {
            transaction_id: "TXN_0123456789ABCDEF".to_string(),
            date: "2024-03-01".to_string(),
            time: String::new(),
            amount: "-45.00".to_string(),
            description: "ALBERT HEIJN 1234 NL".to_string(),
            counterparty_name: "Albert Heijn".to_string(),
            counterparty_account: String::new(),
            account_number: "NL00BANK0123456789".to_string(),
            currency: "EUR".to_string(),
            sequence_number: "1".to_string(),
            balance_after: "0".to_string(),
            source_file: "rabo.csv".to_string(),
            line_number: 2,
            bank: "rabobank".to_string(),
            category: "Food".to_string(),
            subcategory: "groceries".to_string(),
            source: "rule".to_string(),
            confidence: 1.0,
            needs_review: false,
            matched_keyword: "albert heijn".to_string(),
        };

        let movements = movements_from_output(std::slice::from_ref(&row)).unwrap();
        assert_eq!(movements[0].amount, Decimal::from_str("-45.00").unwrap());
        assert_eq!(movements[0].category, "Food");

        let mut broken = row;
        broken.date = "01-03-2024".to_string();
        let err = movements_from_output(&[broken]).unwrap_err();
        assert!(err.to_string().contains("rabo.csv line 2"));
    }
}
