// 📥 Ingestion - many export files in, one unified table out
//
// File-level failures skip the file, row-level failures drop the row.
// Neither stops the run; both end up as diagnostics in the report.

use crate::error::IngestionError;
use crate::identity::assign_ids;
use crate::parser::{detect_format, file_name_of, get_parser, read_table, BankFormat};
use crate::transaction::Transaction;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One input file plus an optional declared bank format
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub hint: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceFile {
            path: path.into(),
            hint: None,
        }
    }

    /// Builder pattern: declared format (`rabobank`, `abn`, ...)
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// A file that could not be ingested at all
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub error: String,
}

/// A single row that was dropped from an otherwise readable file
#[derive(Debug, Clone, Serialize)]
pub struct DroppedRow {
    pub file: String,
    pub line: usize,
    pub error: String,
}

/// Per-file outcome for progress output
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file: String,
    pub format: BankFormat,
    pub encoding: Option<String>,
    pub rows: usize,
    pub dropped: usize,
}

/// Unified transaction table plus ingestion diagnostics
#[derive(Debug, Default)]
pub struct IngestReport {
    pub transactions: Vec<Transaction>,
    pub files: Vec<FileSummary>,
    pub skipped_files: Vec<SkippedFile>,
    pub dropped_rows: Vec<DroppedRow>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_files.is_empty() && self.dropped_rows.is_empty()
    }
}

/// Parse one file into transactions and its row-level diagnostics.
pub fn ingest_file(
    path: &Path,
    hint: Option<&str>,
) -> Result<(FileSummary, Vec<Transaction>, Vec<IngestionError>), IngestionError> {
    let table = read_table(path)?;
    let format = detect_format(path, hint, &table.headers)?;
    let parser = get_parser(format);

    log::debug!(
        "{}: {} rows as {} (parser v{})",
        table.file_name,
        table.rows.len(),
        format.name(),
        parser.version()
    );

    let parsed = parser.parse_table(&table)?;
    let summary = FileSummary {
        file: table.file_name.clone(),
        format,
        encoding: table.encoding.map(str::to_string),
        rows: parsed.transactions.len(),
        dropped: parsed.dropped_rows.len(),
    };

    Ok((summary, parsed.transactions, parsed.dropped_rows))
}

/// Ingest every source file sequentially and assign identifiers.
///
/// Rows keep file order, files keep argument order. Overlapping exports
/// are not deduplicated; overlapping rows share an identifier instead.
pub fn ingest_files(sources: &[SourceFile]) -> IngestReport {
    let mut report = IngestReport::default();

    for source in sources {
        match ingest_file(&source.path, source.hint.as_deref()) {
            Ok((summary, transactions, dropped)) => {
                log::info!(
                    "{}: {} transactions ({}), {} rows dropped",
                    summary.file,
                    summary.rows,
                    summary.format.name(),
                    summary.dropped
                );
                report.transactions.extend(transactions);
                report
                    .dropped_rows
                    .extend(dropped.into_iter().map(|e| dropped_row(&summary.file, e)));
                report.files.push(summary);
            }
            Err(e) => {
                log::warn!("skipping {}: {}", source.path.display(), e);
                report.skipped_files.push(SkippedFile {
                    file: file_name_of(&source.path),
                    error: e.to_string(),
                });
            }
        }
    }

    assign_ids(&mut report.transactions);
    report
}

fn dropped_row(file: &str, error: IngestionError) -> DroppedRow {
    let line = match &error {
        IngestionError::BadAmount { line, .. } | IngestionError::BadDate { line, .. } => *line,
        _ => 0,
    };
    DroppedRow {
        file: file.to_string(),
        line,
        error: error.to_string(),
    }
}

/// Collect bank export files (`.csv`, `.txt`, spreadsheets) in a directory,
/// sorted by name.
pub fn discover_files(dir: &Path) -> std::io::Result<Vec<SourceFile>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            matches!(
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase())
                    .as_deref(),
                Some("csv" | "txt" | "xls" | "xlsx" | "xlsm" | "ods")
            )
        })
        .collect();
    paths.sort();

    Ok(paths.into_iter().map(SourceFile::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_xlsxwriter::Workbook;
    use std::fs;
    use std::str::FromStr;
    use tempfile::TempDir;

    const RABO_HEADER: &str = "\"IBAN/BBAN\",\"Munt\",\"Volgnr\",\"Datum\",\"Bedrag\",\"Saldo na trn\",\"Naam tegenpartij\",\"Omschrijving-1\",\"Omschrijving-2\",\"Omschrijving-3\"";

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_bad_amount_row_dropped_file_continues() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "{RABO_HEADER}\n\
             \"NL00BANK0123456789\",\"EUR\",\"1\",\"2024-03-01\",\"-45,00\",\"100,00\",\"Albert Heijn\",\"AH\",\"\",\"\"\n\
             \"NL00BANK0123456789\",\"EUR\",\"2\",\"2024-03-02\",\"abc\",\"100,00\",\"Jumbo\",\"J\",\"\",\"\"\n\
             \"NL00BANK0123456789\",\"EUR\",\"3\",\"2024-03-03\",\"+2.500,00\",\"100,00\",\"Werkgever\",\"Salaris\",\"\",\"\"\n"
        );
        let path = write(&dir, "rabo_march.csv", content.as_bytes());

        let report = ingest_files(&[SourceFile::new(path)]);
        assert_eq!(report.transactions.len(), 2);
        assert_eq!(report.dropped_rows.len(), 1);
        assert_eq!(report.dropped_rows[0].line, 3);
        assert!(report.skipped_files.is_empty());
        assert_eq!(report.transactions[1].amount, Decimal::from_str("2500").unwrap());
        assert!(report.transactions.iter().all(|t| t.id.is_some()));
    }

    #[test]
    fn test_unknown_format_skipped_others_continue() {
        let dir = TempDir::new().unwrap();
        let good = write(
            &dir,
            "export.csv",
            b"Datum;Bedrag;Omschrijving\n01-03-2024;-12,30;NS reis\n",
        );
        let bad = write(&dir, "notes.csv", b"foo,bar\n1,2\n");
        let unreadable = write(&dir, "binary.csv", &[0x81, b',', 0x8D, b'\n']);

        let report = ingest_files(&[
            SourceFile::new(bad),
            SourceFile::new(unreadable),
            SourceFile::new(good),
        ]);

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].amount, Decimal::from_str("-12.30").unwrap());
        assert_eq!(report.transactions[0].bank, BankFormat::Generic);
        assert_eq!(report.skipped_files.len(), 2);
        assert_eq!(report.skipped_files[0].file, "notes.csv");
        assert!(report.skipped_files[1].error.contains("encoding"));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_windows_1252_export() {
        let dir = TempDir::new().unwrap();
        let mut content = b"Datum,Bedrag,Omschrijving,Naam tegenpartij\n2024-03-01,\"-3,50\",Koffie,Caf".to_vec();
        content.push(0xE9);
        content.extend_from_slice(b" Ren\n");
        let path = write(&dir, "export.csv", &content);

        let report = ingest_files(&[SourceFile::new(path).with_hint("generic")]);
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.files[0].encoding.as_deref(), Some("windows-1252"));
    }

    /// Write a one-sheet workbook; numeric cells stay numbers like in bank exports
    fn write_workbook(path: &Path, headers: &[&str], rows: &[Vec<Cell>]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (i, row) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                match cell {
                    Cell::Num(n) => sheet.write_number(r, col as u16, *n).unwrap(),
                    Cell::Text(t) => sheet.write_string(r, col as u16, *t).unwrap(),
                };
            }
        }
        workbook.save(path).unwrap();
    }

    enum Cell {
        Num(f64),
        Text(&'static str),
    }

    #[test]
    fn test_abn_amro_spreadsheet() {
        use Cell::{Num, Text};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mutaties_maart.xlsx");
        write_workbook(
            &path,
            &[
                "Rekeningnummer", "Muntsoort", "Transactiedatum", "Rentedatum", "Beginsaldo",
                "Eindsaldo", "Transactiebedrag", "Omschrijving",
            ],
            &[
                vec![
                    Num(123456789.0), Text("EUR"), Num(20240301.0), Num(20240301.0), Num(1000.0),
                    Num(954.5), Num(-45.5), Text("BEA NR:1234  ALBERT HEIJN 1234"),
                ],
                vec![
                    Num(123456789.0), Text("EUR"), Num(20240325.0), Num(20240325.0), Num(954.5),
                    Num(3454.5), Num(2500.0), Text("SEPA Overboeking SALARIS MAART"),
                ],
            ],
        );

        let report = ingest_files(&[SourceFile::new(&path)]);
        assert!(report.is_clean());
        assert_eq!(report.files[0].format, BankFormat::AbnAmro);
        assert_eq!(report.files[0].encoding, None);
        assert_eq!(report.transactions.len(), 2);

        let tx = &report.transactions[0];
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(tx.amount, Decimal::from_str("-45.5").unwrap());
        assert_eq!(tx.balance_after, Decimal::from_str("954.5").unwrap());
        assert_eq!(tx.account_number, "123456789");
        assert_eq!(tx.currency, "EUR");
        assert_eq!(tx.description, "BEA NR:1234 ALBERT HEIJN 1234");
        assert_eq!(tx.line_number, 2);
        assert_eq!(tx.source_file, "mutaties_maart.xlsx");
        assert!(tx.id.is_some());

        assert_eq!(report.transactions[1].amount, Decimal::from(2500));
        assert_eq!(report.transactions[1].line_number, 3);
    }

    #[test]
    fn test_spreadsheet_with_other_headers_uses_header_detection() {
        use Cell::{Num, Text};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.xlsx");
        write_workbook(
            &path,
            &["Datum", "Bedrag", "Omschrijving"],
            &[vec![Text("2024-03-02"), Num(-12.3), Text("NS reis")]],
        );

        let report = ingest_files(&[SourceFile::new(&path)]);
        assert!(report.is_clean());
        assert_eq!(report.files[0].format, BankFormat::Generic);
        assert_eq!(report.transactions[0].amount, Decimal::from_str("-12.3").unwrap());
    }

    #[test]
    fn test_discover_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.csv", b"x");
        write(&dir, "a.xlsx", b"x");
        write(&dir, "readme.md", b"x");

        let files = discover_files(dir.path()).unwrap();
        let names: Vec<String> = files.iter().map(|f| file_name_of(&f.path)).collect();
        assert_eq!(names, vec!["a.xlsx", "b.csv"]);
    }
}
