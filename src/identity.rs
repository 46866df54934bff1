// 🆔 Identity Assigner - content-derived transaction identifiers
//
// The identifier is a pure function of six fields:
//   date | amount | description | counterparty | account | sequence number
// No row order, run timestamp or prior state is involved, so re-importing a
// superset of files yields the same identifiers for the records seen before.
//
// Two genuinely distinct movements sharing all six fields (two identical ATM
// withdrawals on the same day without a bank sequence number) collapse to the
// same identifier. That is accepted: the sequence number is part of the
// fingerprint precisely to separate them whenever the bank provides one.

use crate::transaction::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Constant textual prefix of every identifier
pub const ID_PREFIX: &str = "TXN_";

/// Hex digits kept from the SHA-256 digest (64 bits)
pub const ID_HEX_LEN: usize = 16;

// ============================================================================
// TRANSACTION ID
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CANONICAL SERIALIZATION
// ============================================================================

/// Serialize the identity field subset into one canonical string.
pub fn canonical_identity_string(tx: &Transaction) -> String {
    let fields = [
        tx.date.format("%Y-%m-%d").to_string(),
        canonical_amount(tx.amount),
        canonical_text(&tx.description),
        canonical_text(&tx.counterparty_name),
        canonical_text(&tx.account_number),
        canonical_sequence(&tx.sequence_number),
    ];

    fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join("|")
}

/// `-45.00` and `-45` must fingerprint the same
fn canonical_amount(amount: Decimal) -> String {
    let normalized = amount.normalize();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

fn canonical_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Spreadsheet exports lose zero padding that CSV exports keep
fn canonical_sequence(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

fn escape_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Compute the identifier of one record.
pub fn compute_transaction_id(tx: &Transaction) -> TransactionId {
    let mut hasher = Sha256::new();
    hasher.update(canonical_identity_string(tx).as_bytes());
    let digest = format!("{:X}", hasher.finalize());
    TransactionId(format!("{}{}", ID_PREFIX, &digest[..ID_HEX_LEN]))
}

/// Populate the identifier of every record in the table.
pub fn assign_ids(transactions: &mut [Transaction]) {
    for tx in transactions.iter_mut() {
        tx.id = Some(compute_transaction_id(tx));
    }

    let shared = duplicate_groups(transactions).len();
    if shared > 0 {
        log::info!(
            "{} identifiers are shared by more than one row (overlapping exports or identical movements)",
            shared
        );
    }
}

// ============================================================================
// DUPLICATE GROUPS
// ============================================================================

/// Rows sharing one identifier, for reports that want to collapse them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub id: TransactionId,
    /// Indices into the table the groups were computed from
    pub rows: Vec<usize>,
    pub source_files: Vec<String>,
}

/// Group identity-assigned rows by identifier; only groups of two or more.
pub fn duplicate_groups(transactions: &[Transaction]) -> Vec<DuplicateGroup> {
    let mut by_id: BTreeMap<&TransactionId, Vec<usize>> = BTreeMap::new();
    for (index, tx) in transactions.iter().enumerate() {
        if let Some(id) = tx.id.as_ref() {
            by_id.entry(id).or_default().push(index);
        }
    }

    by_id
        .into_iter()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(id, rows)| {
            let mut source_files: Vec<String> = rows
                .iter()
                .map(|&i| transactions[i].source_file.clone())
                .collect();
            source_files.sort();
            source_files.dedup();
            DuplicateGroup {
                id: id.clone(),
                rows,
                source_files,
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn base() -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Decimal::from_str("-45.00").unwrap(),
            "ALBERT HEIJN 1234 NL",
        )
        .with_counterparty("Albert Heijn")
        .with_account("NL00BANK0123456789")
        .with_sequence("1")
    }

    #[test]
    fn test_id_format() {
        let id = compute_transaction_id(&base());
        assert!(id.as_str().starts_with(ID_PREFIX));
        assert_eq!(id.as_str().len(), ID_PREFIX.len() + ID_HEX_LEN);
        assert!(id.as_str()[ID_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(compute_transaction_id(&base()), compute_transaction_id(&base()));
    }

    #[test]
    fn test_id_ignores_provenance_and_row_order() {
        let a = base().with_source("rabo_jan.csv", 2);
        let b = base().with_source("rabo_jan_feb.csv", 40);
        assert_eq!(compute_transaction_id(&a), compute_transaction_id(&b));

        let other = base().with_sequence("2");
        let mut forward = vec![a.clone(), other.clone()];
        let mut backward = vec![other, a];
        assign_ids(&mut forward);
        assign_ids(&mut backward);
        assert_eq!(forward[0].id, backward[1].id);
        assert_eq!(forward[1].id, backward[0].id);
    }

    #[test]
    fn test_id_sensitive_to_every_identity_field() {
        let original = compute_transaction_id(&base());

        let mut changed = Vec::new();
        let mut tx = base();
        tx.date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        changed.push(tx);
        let mut tx = base();
        tx.amount = Decimal::from_str("45.00").unwrap();
        changed.push(tx);
        let mut tx = base();
        tx.description = "ALBERT HEIJN 1235 NL".to_string();
        changed.push(tx);
        changed.push(base().with_counterparty("Jumbo"));
        changed.push(base().with_account("NL00BANK0000000001"));
        changed.push(base().with_sequence("3"));

        for tx in changed {
            assert_ne!(compute_transaction_id(&tx), original);
        }
    }

    #[test]
    fn test_amount_scale_does_not_matter() {
        let mut short = base();
        short.amount = Decimal::from(-45);
        assert_eq!(compute_transaction_id(&short), compute_transaction_id(&base()));
    }

    #[test]
    fn test_zero_padded_sequence_matches() {
        let padded = base().with_sequence("000000000000000001");
        assert_eq!(compute_transaction_id(&padded), compute_transaction_id(&base()));
    }

    #[test]
    fn test_separator_cannot_shift_between_fields() {
        let a = base().with_counterparty("A|B").with_account("C");
        let b = base().with_counterparty("A").with_account("B|C");
        assert_ne!(canonical_identity_string(&a), canonical_identity_string(&b));
        assert_ne!(compute_transaction_id(&a), compute_transaction_id(&b));
    }

    #[test]
    fn test_duplicate_groups() {
        let mut rows = vec![
            base().with_source("a.csv", 2),
            base().with_sequence("2").with_source("a.csv", 3),
            base().with_source("b.csv", 2),
        ];
        assign_ids(&mut rows);

        let groups = duplicate_groups(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[0].source_files, vec!["a.csv", "b.csv"]);
    }
}
