// Training data - manually labeled transactions on disk
//
// The labeling UI writes one CSV row per transaction it categorized; this
// module reads and writes that file and reports thin labels before training.

use crate::identity::{compute_transaction_id, TransactionId};
use crate::normalize::{parse_amount, parse_date};
use crate::taxonomy::CategoryLabel;
use crate::transaction::Transaction;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A transaction with a manually assigned label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTransaction {
    pub transaction: Transaction,
    pub label: CategoryLabel,
    pub labeled_at: Option<DateTime<Utc>>,
}

impl LabeledTransaction {
    pub fn new(transaction: Transaction, label: CategoryLabel) -> Self {
        LabeledTransaction {
            transaction,
            label,
            labeled_at: None,
        }
    }

    /// Identifier of the wrapped transaction, computed when not yet assigned
    pub fn id(&self) -> TransactionId {
        self.transaction
            .id
            .clone()
            .unwrap_or_else(|| compute_transaction_id(&self.transaction))
    }
}

/// Flat CSV row
#[derive(Debug, Serialize, Deserialize)]
struct TrainingRecord {
    #[serde(rename = "Transaction_ID", default)]
    id: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Time", default)]
    time: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Counterparty_Name", default)]
    counterparty_name: String,
    #[serde(rename = "Account_Number", default)]
    account_number: String,
    #[serde(rename = "Sequence_Number", default)]
    sequence_number: String,
    #[serde(rename = "Source_File", default)]
    source_file: String,
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Subcategory", default)]
    subcategory: String,
    #[serde(rename = "Labeled_At", default)]
    labeled_at: String,
}

impl TrainingRecord {
    fn from_labeled(sample: &LabeledTransaction) -> Self {
        let tx = &sample.transaction;
        TrainingRecord {
            id: sample.id().to_string(),
            date: tx.date.format("%Y-%m-%d").to_string(),
            time: tx.time.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
            amount: tx.amount.to_string(),
            description: tx.description.clone(),
            counterparty_name: tx.counterparty_name.clone(),
            account_number: tx.account_number.clone(),
            sequence_number: tx.sequence_number.clone(),
            source_file: tx.source_file.clone(),
            category: sample.label.category.clone(),
            subcategory: sample.label.subcategory.clone(),
            labeled_at: sample.labeled_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        }
    }

    fn into_labeled(self, line: usize) -> Result<LabeledTransaction> {
        let timestamp = if self.time.is_empty() {
            self.date.clone()
        } else {
            format!("{} {}", self.date, self.time)
        };
        let (date, time) = parse_date(&timestamp)
            .ok_or_else(|| anyhow!("line {}: invalid date `{}`", line, timestamp))?;
        let amount = parse_amount(&self.amount)
            .ok_or_else(|| anyhow!("line {}: invalid amount `{}`", line, self.amount))?;

        let mut tx = Transaction::new(date, amount, self.description)
            .with_counterparty(self.counterparty_name)
            .with_account(self.account_number)
            .with_sequence(self.sequence_number)
            .with_source(self.source_file, line);
        tx.time = time;
        tx.id = Some(compute_transaction_id(&tx));

        let labeled_at = DateTime::parse_from_rfc3339(&self.labeled_at)
            .ok()
            .map(|t| t.with_timezone(&Utc));

        Ok(LabeledTransaction {
            transaction: tx,
            label: CategoryLabel::new(self.category.trim(), self.subcategory.trim()),
            labeled_at,
        })
    }
}

/// Load labeled transactions from a training-data CSV
pub fn load_training_data(path: &Path) -> Result<Vec<LabeledTransaction>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open training data: {:?}", path))?;

    let mut samples = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let record: TrainingRecord = result.context("Failed to deserialize training record")?;
        samples.push(record.into_labeled(index + 2)?);
    }

    log::info!("loaded {} labeled transactions from {:?}", samples.len(), path);
    Ok(samples)
}

/// Write labeled transactions to a training-data CSV
pub fn save_training_data(path: &Path, samples: &[LabeledTransaction]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create training data: {:?}", path))?;

    for sample in samples {
        wtr.serialize(TrainingRecord::from_labeled(sample))?;
    }
    wtr.flush()?;

    Ok(())
}

/// Merge new labels into existing ones; a newer label for the same
/// transaction replaces the older one. Order: existing first, then new.
pub fn merge_labels(
    existing: Vec<LabeledTransaction>,
    updates: Vec<LabeledTransaction>,
) -> Vec<LabeledTransaction> {
    let mut merged = existing;
    for update in updates {
        let id = update.id();
        match merged.iter_mut().find(|s| s.id() == id) {
            Some(slot) => *slot = update,
            None => merged.push(update),
        }
    }
    merged
}

/// Number of usable samples per label (placeholders excluded)
pub fn label_distribution(samples: &[LabeledTransaction]) -> BTreeMap<CategoryLabel, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples.iter().filter(|s| !s.label.is_placeholder()) {
        *counts.entry(sample.label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Labels with fewer than `min` samples
pub fn thin_labels(samples: &[LabeledTransaction], min: usize) -> Vec<(CategoryLabel, usize)> {
    label_distribution(samples)
        .into_iter()
        .filter(|(_, count)| *count < min)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn sample(description: &str, category: &str, subcategory: &str) -> LabeledTransaction {
        let tx = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Decimal::from_str("-45.10").unwrap(),
            description,
        )
        .with_counterparty("Albert Heijn")
        .with_sequence("7");
        LabeledTransaction::new(tx, CategoryLabel::new(category, subcategory))
    }

    #[test]
    fn test_save_and_load_preserves_identity_and_label() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("training.csv");

        let mut timed = sample("AH to go", "Food", "groceries");
        timed.transaction.time = NaiveTime::from_hms_opt(8, 15, 0);
        let original = vec![sample("ALBERT HEIJN 1234", "Food", "groceries"), timed];
        save_training_data(&path, &original).unwrap();

        let loaded = load_training_data(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].label, CategoryLabel::new("Food", "groceries"));
        assert_eq!(loaded[0].id(), original[0].id());
        assert_eq!(loaded[0].transaction.amount, Decimal::from_str("-45.10").unwrap());
        assert_eq!(loaded[1].transaction.time, NaiveTime::from_hms_opt(8, 15, 0));
    }

    #[test]
    fn test_load_rejects_bad_amount() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("training.csv");
        std::fs::write(&path, "Date,Amount,Category\n2024-03-01,veel,Food\n").unwrap();

        let err = load_training_data(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_merge_replaces_same_transaction() {
        let merged = merge_labels(
            vec![sample("Thuisbezorgd", "Food", "groceries"), sample("NS", "Transport", "public")],
            vec![sample("Thuisbezorgd", "Food", "restaurants")],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].label.subcategory, "restaurants");
    }

    #[test]
    fn test_thin_labels_skip_placeholders() {
        let samples = vec![
            sample("a", "Food", "groceries"),
            sample("b", "Food", "groceries"),
            sample("c", "Food", "groceries"),
            sample("d", "Transport", "public"),
            sample("e", "unknown", ""),
        ];
        assert_eq!(
            thin_labels(&samples, 3),
            vec![(CategoryLabel::new("Transport", "public"), 1)]
        );
        assert_eq!(label_distribution(&samples).len(), 2);
    }
}
