use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use bankzaken::training_data::thin_labels;
use bankzaken::{
    discover_files, duplicate_groups, export_csv, find_unusual_transactions,
    get_all_transactions, get_category_summary, get_review_queue, get_source_file_stats,
    ingest_files, insert_categorized, load_training_data, merge_labels, monthly_summary,
    movements_from_output, read_csv, setup_database, spending_trends, summary_stats,
    verify_count, BankFormat, CategorizerConfig, Categorizer, CategoryStats,
    ClassificationSource, JsonFileModelStore, LearnedClassifier, ModelStore, ModelStoreError,
    Movement, SourceFile, DEFAULT_UNUSUAL_MULTIPLIER,
};

const DEFAULT_CONFIG: &str = "config/categories.json";
const DEFAULT_DB: &str = "transactions.db";
const DEFAULT_MODEL: &str = "models/model.json";

#[derive(Debug, Parser)]
#[command(
    name = "bankzaken",
    version,
    about = "Dutch bank export ingestion, stable transaction ids and categorization",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read bank exports, categorize them and store the result
    Import {
        /// Export files, or directories to scan for them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Category taxonomy and ml_config JSON
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// SQLite output database
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        /// Trained model; rules only when absent
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: PathBuf,
        /// Also export the categorized table to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Bank format of every input (rabobank, abnamro, ing, generic)
        #[arg(long, value_parser = parse_bank_hint)]
        hint: Option<BankFormat>,
    },
    /// Fit the learned classifier on labeled transactions
    Train {
        /// Labeled transaction CSVs; a later file relabels rows of an earlier one
        #[arg(long = "training-data", required = true, num_args = 1..)]
        training_data: Vec<PathBuf>,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: PathBuf,
    },
    /// Summaries over stored results
    Stats {
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,
        /// Report on an exported CSV instead of the database
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Standard deviations above the mean that mark an amount as unusual
        #[arg(long, default_value_t = DEFAULT_UNUSUAL_MULTIPLIER)]
        unusual: f64,
    },
}

fn parse_bank_hint(value: &str) -> Result<BankFormat, String> {
    BankFormat::from_hint(value)
        .ok_or_else(|| format!("unknown bank `{value}`; expected rabobank, abnamro, ing or generic"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {
        Command::Import {
            inputs,
            config,
            db,
            model,
            csv,
            hint,
        } => run_import(&inputs, &config, &db, &model, csv.as_deref(), hint),
        Command::Train {
            training_data,
            config,
            model,
        } => run_train(&training_data, &config, &model),
        Command::Stats { db, csv, unusual } => run_stats(&db, csv.as_deref(), unusual),
    }
}

// ============================================================================
// IMPORT
// ============================================================================

fn run_import(
    inputs: &[PathBuf],
    config_path: &Path,
    db_path: &Path,
    model_path: &Path,
    csv_path: Option<&Path>,
    hint: Option<BankFormat>,
) -> Result<()> {
    println!("🗄️  Import: bank exports → categorized SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Configuration
    let config = CategorizerConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration: {:?}", config_path))?;
    println!(
        "✓ Taxonomy: {} categories, {} subcategories, {} keywords",
        config.taxonomy.categories().len(),
        config.taxonomy.subcategory_count(),
        config.taxonomy.keyword_count()
    );

    // 2. Collect source files
    let sources = collect_sources(inputs, hint)?;
    println!("\n📂 Reading {} files...", sources.len());

    // 3. Ingest + identity
    let report = ingest_files(&sources);
    for file in &report.files {
        println!(
            "✓ {} ({}{}): {} transactions, {} rows dropped",
            file.file,
            file.format.name(),
            file.encoding.as_deref().map(|e| format!(", {e}")).unwrap_or_default(),
            file.rows,
            file.dropped
        );
    }
    for skipped in &report.skipped_files {
        println!("⚠️  Skipped {}: {}", skipped.file, skipped.error);
    }
    for dropped in &report.dropped_rows {
        println!("   ↳ dropped {} line {}: {}", dropped.file, dropped.line, dropped.error);
    }

    let shared = duplicate_groups(&report.transactions);
    if !shared.is_empty() {
        println!(
            "ℹ️  {} identifiers appear more than once (overlapping exports)",
            shared.len()
        );
    }

    // 4. Categorize
    println!("\n🏷️  Categorizing...");
    let mut categorizer = Categorizer::new(&config.taxonomy, &config.ml);
    match JsonFileModelStore::new(model_path).load(&config.taxonomy) {
        Ok(Some(model)) => {
            println!("✓ Model {} loaded ({} labels)", model.model_id, model.labels.len());
            categorizer = categorizer.with_model(LearnedClassifier::from_model(model));
        }
        Ok(None) => println!("ℹ️  No trained model at {:?}, rules only", model_path),
        Err(ModelStoreError::Incompatible { reason }) => {
            println!("⚠️  Stored model ignored ({reason}); run `bankzaken train` again");
        }
        Err(e) => return Err(e).context("Failed to load trained model"),
    }

    let records = categorizer.categorize_all(report.transactions);
    print_stats(&CategoryStats::from_records(&records));

    // 5. Persist
    println!("\n💾 Writing results...");
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database: {:?}", db_path))?;
    setup_database(&conn)?;
    let summary = insert_categorized(&conn, &records)?;
    println!("✓ Inserted: {} rows", summary.inserted);
    println!("✓ Refreshed: {} rows", summary.refreshed);
    println!("✓ Database contains {} transactions", verify_count(&conn)?);

    if let Some(csv_path) = csv_path {
        let written = export_csv(csv_path, &records)?;
        println!("✓ Exported {} rows to {:?}", written, csv_path);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.skipped_files.is_empty() && report.dropped_rows.is_empty() {
        println!("🎉 Import complete");
    } else {
        println!(
            "✅ Import complete with {} skipped files and {} dropped rows",
            report.skipped_files.len(),
            report.dropped_rows.len()
        );
    }

    Ok(())
}

fn collect_sources(inputs: &[PathBuf], hint: Option<BankFormat>) -> Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for path in inputs {
        if path.is_dir() {
            let found = discover_files(path)
                .with_context(|| format!("Failed to list directory: {:?}", path))?;
            sources.extend(found);
        } else {
            sources.push(SourceFile::new(path));
        }
    }

    if let Some(format) = hint {
        sources = sources
            .into_iter()
            .map(|s| s.with_hint(format.code()))
            .collect();
    }
    Ok(sources)
}

fn print_stats(stats: &CategoryStats) {
    println!(
        "✓ {}/{} categorized ({:.1}%): {} by rule, {} by model",
        stats.categorized,
        stats.total,
        stats.categorization_rate * 100.0,
        stats.count_for(ClassificationSource::Rule),
        stats.count_for(ClassificationSource::Model)
    );
    println!("✓ {} transactions need review", stats.needs_review);
    for (label, count) in &stats.by_subcategory {
        println!("   {:<32} {:>6}", label, count);
    }
}

// ============================================================================
// TRAIN
// ============================================================================

fn run_train(training_data: &[PathBuf], config_path: &Path, model_path: &Path) -> Result<()> {
    println!("🧠 Train: labeled transactions → model");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = CategorizerConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration: {:?}", config_path))?;

    let mut samples = Vec::new();
    for path in training_data {
        let loaded = load_training_data(path)?;
        println!("✓ Loaded {} labeled transactions from {:?}", loaded.len(), path);
        samples = merge_labels(samples, loaded);
    }
    if training_data.len() > 1 {
        println!("✓ {} distinct labeled transactions after merging", samples.len());
    }

    for (label, count) in thin_labels(&samples, config.ml.min_samples_per_label) {
        println!(
            "⚠️  {} has only {} samples (need {})",
            label.key(),
            count,
            config.ml.min_samples_per_label
        );
    }

    let mut classifier = LearnedClassifier::new();
    let report = classifier
        .train(&samples, &config.taxonomy, &config.ml)
        .context("Training failed")?;

    println!("\n📊 Validation");
    if report.evaluated_on_training {
        println!("⚠️  Validation split was empty; metrics are on training data");
    }
    println!(
        "✓ Accuracy: {:.3} ({} train / {} validation, {} discarded)",
        report.accuracy, report.training_samples, report.validation_samples, report.discarded_samples
    );
    println!("   {:<32} {:>9} {:>9} {:>9} {:>8}", "label", "precision", "recall", "f1", "support");
    for (label, m) in &report.per_label {
        println!(
            "   {:<32} {:>9.3} {:>9.3} {:>9.3} {:>8}",
            label, m.precision, m.recall, m.f1, m.support
        );
    }

    if let Some(model) = classifier.model() {
        JsonFileModelStore::new(model_path).save(model)?;
        println!("\n✓ Model {} saved to {:?}", model.model_id, model_path);
    }

    Ok(())
}

// ============================================================================
// STATS
// ============================================================================

fn run_stats(db_path: &Path, csv_path: Option<&Path>, unusual: f64) -> Result<()> {
    let rows = match csv_path {
        Some(csv_path) => {
            let rows = read_csv(csv_path)?;
            println!("📊 {} transactions in {:?}", rows.len(), csv_path);
            rows
        }
        None => {
            if !db_path.exists() {
                eprintln!("❌ Database not found at {:?}", db_path);
                eprintln!("   Run: bankzaken import <files>");
                eprintln!("   to import transactions first.");
                std::process::exit(1);
            }

            let conn = Connection::open(db_path)?;
            print_database_stats(&conn, db_path)?;
            get_all_transactions(&conn)?
        }
    };

    let movements = movements_from_output(&rows)?;
    print_report(&movements, unusual);
    Ok(())
}

fn print_database_stats(conn: &Connection, db_path: &Path) -> Result<()> {
    println!("📊 {} transactions in {:?}", verify_count(conn)?, db_path);

    println!("\n📂 Sources");
    for stat in get_source_file_stats(conn)? {
        println!(
            "   {:<36} {:<9} {:>6} rows  -{:>10.2}  +{:>10.2}  {}",
            stat.source_file,
            stat.bank,
            stat.transaction_count,
            stat.total_expenses,
            stat.total_income,
            stat.date_range
        );
    }

    println!("\n🏷️  Categories");
    for row in get_category_summary(conn)? {
        println!(
            "   {:<32} {:>6} rows {:>12.2}  ({} to review)",
            format!("{}/{}", row.category, row.subcategory),
            row.transaction_count,
            row.total_amount,
            row.needs_review
        );
    }

    println!("\n🔍 Review queue: {} transactions", get_review_queue(conn)?.len());
    Ok(())
}

fn print_report(movements: &[Movement], unusual: f64) {
    let Some(summary) = summary_stats(movements) else {
        println!("\nℹ️  No transactions to report on");
        return;
    };

    println!(
        "\n💶 {} → {} ({} days)",
        summary.date_range_start, summary.date_range_end, summary.analysis_period_days
    );
    println!(
        "   income +{}  expenses -{}  net {}  average {}",
        summary.total_income, summary.total_expenses, summary.net_amount, summary.avg_transaction
    );
    if let Some(expense) = &summary.largest_expense {
        println!("   largest expense {} on {} ({})", expense.amount, expense.date, expense.description);
    }
    if let Some(income) = &summary.largest_income {
        println!("   largest income  {} on {} ({})", income.amount, income.date, income.description);
    }

    println!("\n📅 Months");
    for month in monthly_summary(movements) {
        println!(
            "   {}  {:>4} rows  +{:>10}  -{:>10}  net {:>10}",
            month.month, month.transaction_count, month.total_income, month.total_expenses, month.net_amount
        );
    }

    if let Some(last) = spending_trends(movements).last() {
        println!(
            "\n📉 Week of {}: spent {} (4-week avg {}, 12-week avg {})",
            last.week_start, last.weekly_total, last.rolling_4w_avg, last.rolling_12w_avg
        );
    }

    let report = find_unusual_transactions(movements, unusual);
    println!(
        "\n🚩 {} unusual transactions (|amount| > {:.2})",
        report.transactions.len(),
        report.threshold
    );
    for m in &report.transactions {
        println!("   {}  {:>10}  {:<16} {}", m.date, m.amount, m.category, m.description);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse<const N: usize>(args: [&str; N]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn test_import_defaults_and_hint() {
        let cli = parse(["bankzaken", "import", "--hint", "ABN AMRO", "a.csv", "exports/"]).unwrap();
        match cli.command {
            Command::Import {
                inputs,
                config,
                db,
                hint,
                csv,
                ..
            } => {
                assert_eq!(inputs, vec![PathBuf::from("a.csv"), PathBuf::from("exports/")]);
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG));
                assert_eq!(db, PathBuf::from(DEFAULT_DB));
                assert_eq!(hint, Some(BankFormat::AbnAmro));
                assert!(csv.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_misspelled_flag_is_rejected() {
        let err = parse(["bankzaken", "import", "--hnt", "rabo", "x.csv"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_unknown_bank_hint_is_rejected() {
        let err = parse(["bankzaken", "import", "--hint", "bunq", "x.csv"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_required_arguments() {
        let err = parse(["bankzaken", "import"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(["bankzaken", "train"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_train_accepts_several_label_files() {
        let cli = parse(["bankzaken", "train", "--training-data", "old.csv", "new.csv"]).unwrap();
        match cli.command {
            Command::Train { training_data, model, .. } => {
                assert_eq!(training_data.len(), 2);
                assert_eq!(model, PathBuf::from(DEFAULT_MODEL));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_stats_options() {
        let cli = parse(["bankzaken", "stats"]).unwrap();
        match cli.command {
            Command::Stats { db, csv, unusual } => {
                assert_eq!(db, PathBuf::from(DEFAULT_DB));
                assert!(csv.is_none());
                assert_eq!(unusual, DEFAULT_UNUSUAL_MULTIPLIER);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = parse(["bankzaken", "stats", "--csv", "out.csv", "--unusual", "2.5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Stats { csv: Some(_), unusual, .. } if unusual == 2.5
        ));
    }
}
