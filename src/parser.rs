// 🏗️ Parser Framework - Dutch bank exports
// One trait, one static column table per bank, two source shapes
// (delimited text and spreadsheets) read through the same table model.

use crate::encoding::decode_with_fallback;
use crate::error::IngestionError;
use crate::normalize::{collapse_whitespace, join_description_parts, parse_amount, parse_date};
use crate::transaction::Transaction;
use calamine::{open_workbook_auto, Data, Reader};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// BankFormat - which bank export layout a file follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BankFormat {
    Rabobank,
    AbnAmro,
    Ing,
    /// Loose alias table for anything else with recognizable headers
    #[default]
    Generic,
}

impl BankFormat {
    /// Human-readable name for display
    pub fn name(&self) -> &'static str {
        match self {
            BankFormat::Rabobank => "Rabobank",
            BankFormat::AbnAmro => "ABN AMRO",
            BankFormat::Ing => "ING",
            BankFormat::Generic => "Generic",
        }
    }

    /// Short code for storage and hints
    pub fn code(&self) -> &'static str {
        match self {
            BankFormat::Rabobank => "rabobank",
            BankFormat::AbnAmro => "abnamro",
            BankFormat::Ing => "ing",
            BankFormat::Generic => "generic",
        }
    }

    /// Parse a declared format hint (`rabo`, `ABN AMRO`, `ing`, ...)
    pub fn from_hint(hint: &str) -> Option<BankFormat> {
        let normalized: String = hint
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "rabo" | "rabobank" => Some(BankFormat::Rabobank),
            "abn" | "abnamro" => Some(BankFormat::AbnAmro),
            "ing" | "ingbank" => Some(BankFormat::Ing),
            "generic" | "csv" => Some(BankFormat::Generic),
            _ => None,
        }
    }

    /// Header-based detection order; Generic last as the catch-all
    pub fn all() -> [BankFormat; 4] {
        [
            BankFormat::Rabobank,
            BankFormat::Ing,
            BankFormat::AbnAmro,
            BankFormat::Generic,
        ]
    }

    fn layout(&self) -> &'static FormatLayout {
        match self {
            BankFormat::Rabobank => &RABOBANK,
            BankFormat::AbnAmro => &ABN_AMRO,
            BankFormat::Ing => &ING,
            BankFormat::Generic => &GENERIC,
        }
    }
}

/// Canonical attribute a source column maps into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalColumn {
    Date,
    Amount,
    /// Ordered description part (0-based)
    Description(u8),
    AccountNumber,
    Currency,
    SequenceNumber,
    BalanceAfter,
    CounterpartyAccount,
    CounterpartyName,
    UltimatePartyName,
    InitiatingPartyName,
    TransactionReference,
    AuthorizationId,
    CreditorId,
    PaymentReference,
    /// `Af`/`Bij` style sign indicator for unsigned amounts
    DebitCredit,
}

// ============================================================================
// STATIC COLUMN TABLES
// ============================================================================

struct FormatLayout {
    /// (source header, canonical column); matched case-insensitively,
    /// first source column wins per canonical column
    columns: &'static [(&'static str, CanonicalColumn)],
    /// Headers that must all be present for header-based detection
    signature: &'static [&'static str],
}

use CanonicalColumn as C;

static RABOBANK: FormatLayout = FormatLayout {
    columns: &[
        ("IBAN/BBAN", C::AccountNumber),
        ("Munt", C::Currency),
        ("Volgnr", C::SequenceNumber),
        ("Datum", C::Date),
        ("Bedrag", C::Amount),
        ("Saldo na trn", C::BalanceAfter),
        ("Tegenrekening IBAN/BBAN", C::CounterpartyAccount),
        ("Naam tegenpartij", C::CounterpartyName),
        ("Naam uiteindelijke partij", C::UltimatePartyName),
        ("Naam initiërende partij", C::InitiatingPartyName),
        ("Transactiereferentie", C::TransactionReference),
        ("Machtigingskenmerk", C::AuthorizationId),
        ("Incassant ID", C::CreditorId),
        ("Betalingskenmerk", C::PaymentReference),
        ("Omschrijving-1", C::Description(0)),
        ("Omschrijving-2", C::Description(1)),
        ("Omschrijving-3", C::Description(2)),
    ],
    signature: &["IBAN/BBAN", "Volgnr", "Bedrag"],
};

static ABN_AMRO: FormatLayout = FormatLayout {
    columns: &[
        ("Rekeningnummer", C::AccountNumber),
        ("Muntsoort", C::Currency),
        ("Transactiedatum", C::Date),
        ("Eindsaldo", C::BalanceAfter),
        ("Transactiebedrag", C::Amount),
        ("Omschrijving", C::Description(0)),
    ],
    signature: &["Rekeningnummer", "Transactiedatum", "Transactiebedrag"],
};

static ING: FormatLayout = FormatLayout {
    columns: &[
        ("Datum", C::Date),
        ("Naam / Omschrijving", C::CounterpartyName),
        ("Rekening", C::AccountNumber),
        ("Tegenrekening", C::CounterpartyAccount),
        ("Af Bij", C::DebitCredit),
        ("Bedrag (EUR)", C::Amount),
        ("Mededelingen", C::Description(0)),
        ("Saldo na mutatie", C::BalanceAfter),
    ],
    signature: &["Af Bij", "Bedrag (EUR)"],
};

static GENERIC: FormatLayout = FormatLayout {
    columns: &[
        ("date", C::Date),
        ("datum", C::Date),
        ("transaction_date", C::Date),
        ("booking_date", C::Date),
        ("boekdatum", C::Date),
        ("valutadatum", C::Date),
        ("amount", C::Amount),
        ("bedrag", C::Amount),
        ("transaction_amount", C::Amount),
        ("value", C::Amount),
        ("mutatie", C::Amount),
        ("description", C::Description(0)),
        ("omschrijving", C::Description(0)),
        ("details", C::Description(0)),
        ("memo", C::Description(0)),
        ("mededelingen", C::Description(1)),
        ("account", C::AccountNumber),
        ("rekening", C::AccountNumber),
        ("account_number", C::AccountNumber),
        ("iban", C::AccountNumber),
        ("rekeningnummer", C::AccountNumber),
        ("balance", C::BalanceAfter),
        ("saldo", C::BalanceAfter),
        ("eindsaldo", C::BalanceAfter),
        ("counterparty", C::CounterpartyName),
        ("tegenpartij", C::CounterpartyName),
        ("naam_tegenpartij", C::CounterpartyName),
        ("naam", C::CounterpartyName),
        ("payee", C::CounterpartyName),
        ("beneficiary", C::CounterpartyName),
        ("tegenrekening", C::CounterpartyAccount),
        ("currency", C::Currency),
        ("munt", C::Currency),
        ("af_bij", C::DebitCredit),
        ("credit_debit", C::DebitCredit),
    ],
    signature: &[],
};

// ============================================================================
// SOURCE TABLE - both source shapes read into one model
// ============================================================================

/// One raw data row with its 1-indexed position in the source file
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub line: usize,
    pub cells: Vec<String>,
}

/// Header + rows of a source file, before any column mapping
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub file_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<SourceRow>,
    /// Encoding that decoded the file (delimited text only)
    pub encoding: Option<&'static str>,
}

pub fn is_spreadsheet(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("xls" | "xlsx" | "xlsm" | "xlsb" | "ods")
    )
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Read a source file into a table, choosing the reader by extension.
pub fn read_table(path: &Path) -> Result<SourceTable, IngestionError> {
    if is_spreadsheet(path) {
        read_spreadsheet(path)
    } else {
        read_delimited(path)
    }
}

/// Delimited text: detect the encoding, sniff the delimiter, keep raw cells.
pub fn read_delimited(path: &Path) -> Result<SourceTable, IngestionError> {
    let file_name = file_name_of(path);
    let bytes = std::fs::read(path).map_err(|source| IngestionError::Io {
        file: file_name.clone(),
        source,
    })?;

    let decoded = decode_with_fallback(&bytes).ok_or_else(|| IngestionError::UnreadableEncoding {
        file: file_name.clone(),
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(decoded.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(decoded.text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| IngestionError::Csv {
            file: file_name.clone(),
            source,
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|source| IngestionError::Csv {
            file: file_name.clone(),
            source,
        })?;

        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 2);
        let cells: Vec<String> = record.iter().map(|c| c.to_string()).collect();

        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        rows.push(SourceRow { line, cells });
    }

    Ok(SourceTable {
        file_name,
        headers,
        rows,
        encoding: Some(decoded.encoding.name()),
    })
}

/// Spreadsheet: first worksheet, first non-empty row is the header.
pub fn read_spreadsheet(path: &Path) -> Result<SourceTable, IngestionError> {
    let file_name = file_name_of(path);
    let spreadsheet_error = |message: String| IngestionError::Spreadsheet {
        file: file_name.clone(),
        message,
    };

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| spreadsheet_error(format!("failed to open workbook: {e}")))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| spreadsheet_error("workbook contains no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| spreadsheet_error(format!("failed to read sheet '{sheet_name}': {e}")))?;

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (index, row) in range.rows().enumerate() {
        let cells: Vec<String> = row.iter().map(cell_to_string).collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        match headers {
            None => headers = Some(cells.iter().map(|c| c.trim().to_string()).collect()),
            Some(_) => rows.push(SourceRow {
                line: index + 1,
                cells,
            }),
        }
    }

    let headers = headers.ok_or_else(|| spreadsheet_error("sheet has no header row".to_string()))?;

    Ok(SourceTable {
        file_name,
        headers,
        rows,
        encoding: None,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

// ============================================================================
// COLUMN MAP
// ============================================================================

/// Resolved positions of canonical columns in one source table
#[derive(Debug, Clone)]
pub struct ColumnMap {
    format: BankFormat,
    positions: HashMap<CanonicalColumn, usize>,
}

impl ColumnMap {
    /// Map source headers through the format's lookup table. Unmapped source
    /// columns are dropped; missing date or amount is an error.
    pub fn resolve(format: BankFormat, headers: &[String]) -> Result<ColumnMap, String> {
        let layout = format.layout();
        let mut positions = HashMap::new();

        for (index, header) in headers.iter().enumerate() {
            let header = header.trim();
            if let Some((_, column)) = layout
                .columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(header))
            {
                positions.entry(*column).or_insert(index);
            }
        }

        for required in [C::Date, C::Amount] {
            if !positions.contains_key(&required) {
                return Err(format!(
                    "{} export needs a {:?} column; headers were [{}]",
                    format.name(),
                    required,
                    headers.join(", ")
                ));
            }
        }

        Ok(ColumnMap { format, positions })
    }

    pub fn format(&self) -> BankFormat {
        self.format
    }

    fn text(&self, cells: &[String], column: CanonicalColumn) -> String {
        self.positions
            .get(&column)
            .and_then(|&i| cells.get(i))
            .map(|v| collapse_whitespace(v))
            .unwrap_or_default()
    }

    /// Normalize one raw row into a transaction.
    pub fn build_transaction(
        &self,
        row: &SourceRow,
        file_name: &str,
    ) -> Result<Transaction, IngestionError> {
        let cells = &row.cells;

        let raw_date = self.text(cells, C::Date);
        let (date, time) = parse_date(&raw_date).ok_or_else(|| IngestionError::BadDate {
            file: file_name.to_string(),
            line: row.line,
            value: raw_date.clone(),
        })?;

        let raw_amount = self.text(cells, C::Amount);
        let mut amount = parse_amount(&raw_amount).ok_or_else(|| IngestionError::BadAmount {
            file: file_name.to_string(),
            line: row.line,
            value: raw_amount.clone(),
        })?;

        if let Some(negative) = debit_credit_sign(&self.text(cells, C::DebitCredit)) {
            amount = if negative { -amount.abs() } else { amount.abs() };
        }

        let mut parts: Vec<(u8, String)> = self
            .positions
            .iter()
            .filter_map(|(column, &i)| match column {
                C::Description(order) => Some((*order, cells.get(i).cloned().unwrap_or_default())),
                _ => None,
            })
            .collect();
        parts.sort_by_key(|(order, _)| *order);
        let parts: Vec<String> = parts.into_iter().map(|(_, part)| part).collect();

        let balance_after = parse_amount(&self.text(cells, C::BalanceAfter)).unwrap_or(Decimal::ZERO);

        let mut tx = Transaction::new(date, amount, join_description_parts(&parts));
        tx.time = time;
        tx.account_number = self.text(cells, C::AccountNumber);
        tx.currency = self.text(cells, C::Currency);
        tx.sequence_number = self.text(cells, C::SequenceNumber);
        tx.balance_after = balance_after;
        tx.counterparty_account = self.text(cells, C::CounterpartyAccount);
        tx.counterparty_name = self.text(cells, C::CounterpartyName);
        tx.ultimate_party_name = self.text(cells, C::UltimatePartyName);
        tx.initiating_party_name = self.text(cells, C::InitiatingPartyName);
        tx.transaction_reference = self.text(cells, C::TransactionReference);
        tx.authorization_id = self.text(cells, C::AuthorizationId);
        tx.creditor_id = self.text(cells, C::CreditorId);
        tx.payment_reference = self.text(cells, C::PaymentReference);
        tx.source_file = file_name.to_string();
        tx.line_number = row.line;
        tx.bank = self.format;

        Ok(tx)
    }
}

/// `Some(true)` for debit (`Af`), `Some(false)` for credit (`Bij`)
fn debit_credit_sign(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "af" | "debit" | "d" | "dr" => Some(true),
        "bij" | "credit" | "c" | "cr" => Some(false),
        _ => None,
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// Transactions parsed from one file plus the rows that had to be dropped
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub transactions: Vec<Transaction>,
    pub dropped_rows: Vec<IngestionError>,
}

/// BankParser - turns a source table into unified transactions
///
/// Adding a bank means adding a column table and an implementation; the
/// ingestion loop never changes.
pub trait BankParser {
    /// Map every row of the table; row failures are collected, not raised
    fn parse_table(&self, table: &SourceTable) -> Result<ParsedFile, IngestionError>;

    /// Get the format this parser handles
    fn format(&self) -> BankFormat;

    /// Get parser version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Parser driven entirely by a static column table
pub struct MappedParser {
    format: BankFormat,
}

impl MappedParser {
    pub fn new(format: BankFormat) -> Self {
        MappedParser { format }
    }
}

impl BankParser for MappedParser {
    fn parse_table(&self, table: &SourceTable) -> Result<ParsedFile, IngestionError> {
        let map = ColumnMap::resolve(self.format, &table.headers).map_err(|reason| {
            IngestionError::UnknownBankFormat {
                file: table.file_name.clone(),
                reason,
            }
        })?;

        let mut parsed = ParsedFile::default();
        for row in &table.rows {
            match map.build_transaction(row, &table.file_name) {
                Ok(tx) => parsed.transactions.push(tx),
                Err(e) => {
                    log::warn!("dropping row: {}", e);
                    parsed.dropped_rows.push(e);
                }
            }
        }

        Ok(parsed)
    }

    fn format(&self) -> BankFormat {
        self.format
    }
}

/// Get appropriate parser for a format
pub fn get_parser(format: BankFormat) -> Box<dyn BankParser> {
    Box::new(MappedParser::new(format))
}

// ============================================================================
// DETECTION
// ============================================================================

/// Pick the format of a table.
///
/// 1. An explicit hint wins
/// 2. Filename patterns (`rabo`, `abn`) and the spreadsheet extension (ABN
///    AMRO) propose a layout, accepted only when its header signature is present
/// 3. Header signature, in `BankFormat::all()` order
pub fn detect_format(
    path: &Path,
    hint: Option<&str>,
    headers: &[String],
) -> Result<BankFormat, IngestionError> {
    let file_name = file_name_of(path);

    if let Some(hint) = hint {
        return BankFormat::from_hint(hint).ok_or_else(|| IngestionError::UnknownBankFormat {
            file: file_name.clone(),
            reason: format!("unsupported format hint `{hint}`"),
        });
    }

    if let Some(guess) = guess_from_file_name(path) {
        if matches_headers(guess, headers) {
            return Ok(guess);
        }
        log::debug!(
            "{}: file name suggests {} but headers do not match, checking headers",
            file_name,
            guess.name()
        );
    }

    BankFormat::all()
        .into_iter()
        .find(|&format| matches_headers(format, headers))
        .ok_or_else(|| IngestionError::UnknownBankFormat {
            file: file_name,
            reason: format!("no known bank layout matches headers [{}]", headers.join(", ")),
        })
}

fn guess_from_file_name(path: &Path) -> Option<BankFormat> {
    let lower = file_name_of(path).to_lowercase();
    if lower.contains("rabo") {
        Some(BankFormat::Rabobank)
    } else if lower.contains("abn") || is_spreadsheet(path) {
        Some(BankFormat::AbnAmro)
    } else {
        None
    }
}

/// Signature headers all present and the required columns resolvable
fn matches_headers(format: BankFormat, headers: &[String]) -> bool {
    let signature_present = format
        .layout()
        .signature
        .iter()
        .all(|s| headers.iter().any(|h| h.trim().eq_ignore_ascii_case(s)));
    signature_present && ColumnMap::resolve(format, headers).is_ok()
}

// ============================================================================
// TESTS
// ============================================================================
