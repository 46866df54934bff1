// Bankzaken - Core Library
// Dutch bank export ingestion, stable transaction identity and categorization.
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod taxonomy;
pub mod transaction;
pub mod encoding;
pub mod normalize;
pub mod parser;
pub mod ingest;
pub mod identity;
pub mod rules;
pub mod features;
pub mod model;
pub mod store;
pub mod training_data;
pub mod categorize;
pub mod output;
pub mod report;
pub mod db;

// Re-export commonly used types
pub use error::{ConfigError, IngestionError, ModelStoreError, PredictionError, TrainingError};
pub use config::{CategorizerConfig, MlConfig};
pub use taxonomy::{Category, CategoryLabel, Subcategory, Taxonomy};
pub use transaction::Transaction;
pub use parser::{
    BankFormat, BankParser, ColumnMap, MappedParser, ParsedFile, SourceTable,
    detect_format, get_parser, read_table,
};
pub use ingest::{
    DroppedRow, FileSummary, IngestReport, SkippedFile, SourceFile,
    discover_files, ingest_file, ingest_files,
};
pub use identity::{
    DuplicateGroup, TransactionId,
    assign_ids, canonical_identity_string, compute_transaction_id, duplicate_groups,
};
pub use rules::{KeywordRule, RuleEngine, RuleMatch};
pub use features::{FeatureExtractor, TfIdfVectorizer, FEATURE_PIPELINE_VERSION};
pub use model::{LabelMetrics, LearnedClassifier, ModelPrediction, TrainedModel, TrainingReport};
pub use store::{JsonFileModelStore, ModelStore, SqliteModelStore};
pub use training_data::{LabeledTransaction, load_training_data, merge_labels, save_training_data};
pub use categorize::{
    CategorizedTransaction, Categorizer, Classification, ClassificationSource, CategoryStats,
};
pub use output::{OutputRecord, export_csv, read_csv};
pub use report::{
    Movement, MonthlySummary, SummaryStats, UnusualReport, WeeklySpending,
    DEFAULT_UNUSUAL_MULTIPLIER, find_unusual_transactions, monthly_summary,
    movements_from_output, movements_from_records, spending_trends, summary_stats,
};
pub use db::{
    CategorySummary, SourceFileStat, WriteSummary,
    setup_database, insert_categorized, get_all_transactions, get_review_queue,
    get_source_file_stats, get_transactions_by_source, get_category_summary, verify_count,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
