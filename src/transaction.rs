// Unified transaction record - the canonical schema every bank format maps into

use crate::identity::TransactionId;
use crate::parser::BankFormat;
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One bank movement after normalization.
///
/// Core fields are immutable once the identifier is assigned. Category
/// information never lives here; see `categorize::CategorizedTransaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Content-derived identifier, `None` until the identity pass ran
    #[serde(rename = "Transaction_ID", default)]
    pub id: Option<TransactionId>,

    // ========================================================================
    // CORE FIELDS
    // ========================================================================
    #[serde(rename = "Date")]
    pub date: NaiveDate,

    /// Time of day, only when the source carries one
    #[serde(rename = "Time", default)]
    pub time: Option<NaiveTime>,

    /// Signed canonical amount: income positive, expense negative
    #[serde(rename = "Amount")]
    pub amount: Decimal,

    #[serde(rename = "Description", default)]
    pub description: String,

    #[serde(rename = "Account_Number", default)]
    pub account_number: String,

    #[serde(rename = "Currency", default)]
    pub currency: String,

    #[serde(rename = "Sequence_Number", default)]
    pub sequence_number: String,

    #[serde(rename = "Balance_After", default)]
    pub balance_after: Decimal,

    // ========================================================================
    // COUNTERPARTY & REFERENCES
    // ========================================================================
    #[serde(rename = "Counterparty_Account", default)]
    pub counterparty_account: String,

    #[serde(rename = "Counterparty_Name", default)]
    pub counterparty_name: String,

    #[serde(rename = "Ultimate_Party_Name", default)]
    pub ultimate_party_name: String,

    #[serde(rename = "Initiating_Party_Name", default)]
    pub initiating_party_name: String,

    #[serde(rename = "Transaction_Reference", default)]
    pub transaction_reference: String,

    #[serde(rename = "Authorization_ID", default)]
    pub authorization_id: String,

    #[serde(rename = "Creditor_ID", default)]
    pub creditor_id: String,

    #[serde(rename = "Payment_Reference", default)]
    pub payment_reference: String,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    #[serde(rename = "Source_File", default)]
    pub source_file: String,

    /// 1-indexed line (CSV) or row (spreadsheet) in the source file
    #[serde(rename = "Line_Number", default)]
    pub line_number: usize,

    #[serde(rename = "Bank", default)]
    pub bank: BankFormat,
}

impl Transaction {
    /// Create a record with the required fields; everything else empty.
    pub fn new(date: NaiveDate, amount: Decimal, description: impl Into<String>) -> Self {
        Transaction {
            id: None,
            date,
            time: None,
            amount,
            description: description.into(),
            account_number: String::new(),
            currency: String::new(),
            sequence_number: String::new(),
            balance_after: Decimal::ZERO,
            counterparty_account: String::new(),
            counterparty_name: String::new(),
            ultimate_party_name: String::new(),
            initiating_party_name: String::new(),
            transaction_reference: String::new(),
            authorization_id: String::new(),
            creditor_id: String::new(),
            payment_reference: String::new(),
            source_file: String::new(),
            line_number: 0,
            bank: BankFormat::Generic,
        }
    }

    /// Builder pattern: counterparty name
    pub fn with_counterparty(mut self, name: impl Into<String>) -> Self {
        self.counterparty_name = name.into();
        self
    }

    /// Builder pattern: account number
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account_number = account.into();
        self
    }

    /// Builder pattern: bank sequence number
    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence_number = sequence.into();
        self
    }

    /// Builder pattern: time of day
    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Builder pattern: provenance
    pub fn with_source(mut self, source_file: impl Into<String>, line_number: usize) -> Self {
        self.source_file = source_file.into();
        self.line_number = line_number;
        self
    }

    /// Text both classifiers look at: description followed by counterparty
    pub fn classification_text(&self) -> String {
        let description = self.description.trim();
        let counterparty = self.counterparty_name.trim();
        match (description.is_empty(), counterparty.is_empty()) {
            (false, false) => format!("{description} {counterparty}"),
            (false, true) => description.to_string(),
            (true, false) => counterparty.to_string(),
            (true, true) => String::new(),
        }
    }

    pub fn is_income(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Identifier rendered for display; empty before identity assignment
    pub fn id_str(&self) -> &str {
        self.id.as_ref().map(|id| id.as_str()).unwrap_or("")
    }
}

// ============================================================================
// TESTS
// ============================================================================
