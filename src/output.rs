// Output table - one flat row per categorized transaction
//
// Shared by the CSV export, the SQLite table reader and the JSON API.

use crate::categorize::CategorizedTransaction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(rename = "Transaction_ID")]
    pub transaction_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    /// Canonical decimal text
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Counterparty_Name")]
    pub counterparty_name: String,
    #[serde(rename = "Counterparty_Account")]
    pub counterparty_account: String,
    #[serde(rename = "Account_Number")]
    pub account_number: String,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Sequence_Number")]
    pub sequence_number: String,
    #[serde(rename = "Balance_After")]
    pub balance_after: String,
    #[serde(rename = "Source_File")]
    pub source_file: String,
    #[serde(rename = "Line_Number")]
    pub line_number: usize,
    #[serde(rename = "Bank")]
    pub bank: String,
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Subcategory")]
    pub subcategory: String,
    /// `rule`, `model` or `unassigned`
    #[serde(rename = "Classification_Source")]
    pub source: String,
    #[serde(rename = "Confidence")]
    pub confidence: f64,
    #[serde(rename = "Needs_Review")]
    pub needs_review: bool,
    #[serde(rename = "Matched_Keyword")]
    pub matched_keyword: String,
}

impl From<&CategorizedTransaction> for OutputRecord {
    fn from(record: &CategorizedTransaction) -> Self {
        let tx = &record.transaction;
        OutputRecord {
            transaction_id: tx.id_str().to_string(),
            date: tx.date.format("%Y-%m-%d").to_string(),
            time: tx.time.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
            amount: tx.amount.to_string(),
            description: tx.description.clone(),
            counterparty_name: tx.counterparty_name.clone(),
            counterparty_account: tx.counterparty_account.clone(),
            account_number: tx.account_number.clone(),
            currency: tx.currency.clone(),
            sequence_number: tx.sequence_number.clone(),
            balance_after: tx.balance_after.to_string(),
            source_file: tx.source_file.clone(),
            line_number: tx.line_number,
            bank: tx.bank.code().to_string(),
            category: record.category().to_string(),
            subcategory: record.subcategory().to_string(),
            source: record.source().as_str().to_string(),
            confidence: record.confidence(),
            needs_review: record.needs_review,
            matched_keyword: record
                .classification
                .matched_keyword()
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// Write the categorized table as CSV
pub fn export_csv(path: &Path, records: &[CategorizedTransaction]) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;

    for record in records {
        wtr.serialize(OutputRecord::from(record))?;
    }
    wtr.flush()?;

    Ok(records.len())
}

/// Read an exported CSV back
pub fn read_csv(path: &Path) -> Result<Vec<OutputRecord>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open output file: {:?}", path))?;

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result.context("Failed to deserialize output row")?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::Classification;
    use crate::taxonomy::CategoryLabel;
    use crate::transaction::Transaction;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tempfile::TempDir;

    #[test]
    fn test_export_and_read_back() {
        let mut tx = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Decimal::from_str("-45.00").unwrap(),
            "ALBERT HEIJN 1234 NL",
        )
        .with_source("rabo.csv", 2);
        tx.id = Some(crate::identity::compute_transaction_id(&tx));

        let records = vec![CategorizedTransaction {
            transaction: tx,
            classification: Classification::RuleMatch {
                label: CategoryLabel::new("Food", "groceries"),
                keyword: "albert heijn".to_string(),
            },
            needs_review: false,
        }];

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        assert_eq!(export_csv(&path, &records).unwrap(), 1);

        let rows = read_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], OutputRecord::from(&records[0]));
        assert_eq!(rows[0].amount, "-45.00");
        assert_eq!(rows[0].source, "rule");
        assert_eq!(rows[0].bank, "generic");
        assert!(rows[0].transaction_id.starts_with("TXN_"));
    }
}
