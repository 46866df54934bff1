// 🗄️ Output database - categorized transactions in SQLite
//
// One row per source row, keyed by (source_file, line_number). Re-importing
// a file under the same name overwrites each row with its latest content and
// category and never duplicates rows; two rows with the same Transaction_ID
// from overlapping exports both stay.

use crate::categorize::CategorizedTransaction;
use crate::output::OutputRecord;
use anyhow::Result;
use rusqlite::{types::ToSql, Connection, Row};
use serde::Serialize;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categorized_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            amount TEXT NOT NULL,
            amount_numeric REAL NOT NULL,
            description TEXT NOT NULL,
            counterparty_name TEXT NOT NULL,
            counterparty_account TEXT NOT NULL,
            account_number TEXT NOT NULL,
            currency TEXT NOT NULL,
            sequence_number TEXT NOT NULL,
            balance_after TEXT NOT NULL,
            source_file TEXT NOT NULL,
            line_number INTEGER NOT NULL,
            bank TEXT NOT NULL,
            category TEXT NOT NULL,
            subcategory TEXT NOT NULL,
            classification_source TEXT NOT NULL,
            confidence REAL NOT NULL,
            needs_review INTEGER NOT NULL,
            matched_keyword TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(source_file, line_number)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_id ON categorized_transactions(transaction_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_date ON categorized_transactions(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_category ON categorized_transactions(category, subcategory)",
        [],
    )?;

    Ok(())
}

/// Counts from one write pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    /// Rows already present at the same (source_file, line_number), overwritten
    pub refreshed: usize,
}

pub fn insert_categorized(conn: &Connection, records: &[CategorizedTransaction]) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();

    for record in records {
        let row = OutputRecord::from(record);
        let amount_numeric: f64 = row.amount.parse().unwrap_or(0.0);
        let line_number = row.line_number as i64;

        // Positions shared by the INSERT and the UPDATE below
        let values: [&dyn ToSql; 21] = [
            &row.transaction_id,
            &row.date,
            &row.time,
            &row.amount,
            &amount_numeric,
            &row.description,
            &row.counterparty_name,
            &row.counterparty_account,
            &row.account_number,
            &row.currency,
            &row.sequence_number,
            &row.balance_after,
            &row.source_file,
            &line_number,
            &row.bank,
            &row.category,
            &row.subcategory,
            &row.source,
            &row.confidence,
            &row.needs_review,
            &row.matched_keyword,
        ];

        let result = conn.execute(
            "INSERT INTO categorized_transactions (
                transaction_id, date, time, amount, amount_numeric, description,
                counterparty_name, counterparty_account, account_number, currency,
                sequence_number, balance_after, source_file, line_number, bank,
                category, subcategory, classification_source, confidence, needs_review,
                matched_keyword
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            &values[..],
        );

        match result {
            Ok(_) => summary.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // Same (source_file, line_number): the row now holds whatever
                // the latest import of that file says, content included
                conn.execute(
                    "UPDATE categorized_transactions
                     SET transaction_id = ?1, date = ?2, time = ?3, amount = ?4,
                         amount_numeric = ?5, description = ?6, counterparty_name = ?7,
                         counterparty_account = ?8, account_number = ?9, currency = ?10,
                         sequence_number = ?11, balance_after = ?12, bank = ?15,
                         category = ?16, subcategory = ?17, classification_source = ?18,
                         confidence = ?19, needs_review = ?20, matched_keyword = ?21
                     WHERE source_file = ?13 AND line_number = ?14",
                    &values[..],
                )?;
                summary.refreshed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    log::info!(
        "stored {} new rows, refreshed {} existing rows",
        summary.inserted,
        summary.refreshed
    );
    Ok(summary)
}

const SELECT_COLUMNS: &str = "SELECT transaction_id, date, time, amount, description,
        counterparty_name, counterparty_account, account_number, currency,
        sequence_number, balance_after, source_file, line_number, bank,
        category, subcategory, classification_source, confidence, needs_review,
        matched_keyword
     FROM categorized_transactions";

fn read_row(row: &Row) -> rusqlite::Result<OutputRecord> {
    let line_number: i64 = row.get(12)?;
    Ok(OutputRecord {
        transaction_id: row.get(0)?,
        date: row.get(1)?,
        time: row.get(2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        counterparty_name: row.get(5)?,
        counterparty_account: row.get(6)?,
        account_number: row.get(7)?,
        currency: row.get(8)?,
        sequence_number: row.get(9)?,
        balance_after: row.get(10)?,
        source_file: row.get(11)?,
        line_number: line_number.max(0) as usize,
        bank: row.get(13)?,
        category: row.get(14)?,
        subcategory: row.get(15)?,
        source: row.get(16)?,
        confidence: row.get(17)?,
        needs_review: row.get(18)?,
        matched_keyword: row.get(19)?,
    })
}

pub fn get_all_transactions(conn: &Connection) -> Result<Vec<OutputRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} ORDER BY date DESC, source_file, line_number"
    ))?;

    let records = stmt
        .query_map([], read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Rows whose confidence fell below the acceptance threshold
pub fn get_review_queue(conn: &Connection) -> Result<Vec<OutputRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE needs_review = 1 ORDER BY confidence ASC, date DESC"
    ))?;

    let records = stmt
        .query_map([], read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Get transactions by source file
pub fn get_transactions_by_source(conn: &Connection, source_file: &str) -> Result<Vec<OutputRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE source_file = ?1 ORDER BY line_number"
    ))?;

    let records = stmt
        .query_map([source_file], read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categorized_transactions",
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Source file statistics
#[derive(Debug, Clone, Serialize)]
pub struct SourceFileStat {
    pub source_file: String,
    pub bank: String,
    pub transaction_count: i64,
    pub total_expenses: f64,
    pub total_income: f64,
    pub date_range: String,
}

/// Get statistics grouped by source file
pub fn get_source_file_stats(conn: &Connection) -> Result<Vec<SourceFileStat>> {
    let mut stmt = conn.prepare(
        "SELECT
            source_file,
            bank,
            COUNT(*) as count,
            SUM(CASE WHEN amount_numeric < 0 THEN ABS(amount_numeric) ELSE 0 END) as expenses,
            SUM(CASE WHEN amount_numeric > 0 THEN amount_numeric ELSE 0 END) as income,
            MIN(date) || ' - ' || MAX(date) as date_range
         FROM categorized_transactions
         GROUP BY source_file, bank
         ORDER BY bank, source_file",
    )?;

    let stats = stmt
        .query_map([], |row| {
            Ok(SourceFileStat {
                source_file: row.get(0)?,
                bank: row.get(1)?,
                transaction_count: row.get(2)?,
                total_expenses: row.get(3)?,
                total_income: row.get(4)?,
                date_range: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}

/// Per-subcategory totals
#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub subcategory: String,
    pub transaction_count: i64,
    pub total_amount: f64,
    pub needs_review: i64,
}

pub fn get_category_summary(conn: &Connection) -> Result<Vec<CategorySummary>> {
    let mut stmt = conn.prepare(
        "SELECT
            category,
            subcategory,
            COUNT(*) as count,
            SUM(amount_numeric) as total,
            SUM(needs_review) as review
         FROM categorized_transactions
         GROUP BY category, subcategory
         ORDER BY category, subcategory",
    )?;

    let summary = stmt
        .query_map([], |row| {
            Ok(CategorySummary {
                category: row.get(0)?,
                subcategory: row.get(1)?,
                transaction_count: row.get(2)?,
                total_amount: row.get(3)?,
                needs_review: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================
