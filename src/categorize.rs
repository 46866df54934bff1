// 🎯 Categorization Orchestrator - rules first, model second
//
// Per record:
//   UNCLASSIFIED → RULE_MATCHED (1.0)       a keyword hits
//               → MODEL_SCORED (p)          otherwise, when a model is loaded
//               → UNASSIGNED (0.0)          otherwise
// A rule hit is final even when a loaded model would disagree.

use crate::config::MlConfig;
use crate::error::PredictionError;
use crate::model::LearnedClassifier;
use crate::rules::RuleEngine;
use crate::taxonomy::{CategoryLabel, Taxonomy};
use crate::transaction::Transaction;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Category written for records nothing could classify
pub const UNASSIGNED_CATEGORY: &str = "unknown";

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Outcome of the two-stage pipeline for one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Classification {
    RuleMatch {
        label: CategoryLabel,
        keyword: String,
    },
    ModelScore {
        label: CategoryLabel,
        confidence: f64,
    },
    Unassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Rule,
    Model,
    Unassigned,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Rule => "rule",
            ClassificationSource::Model => "model",
            ClassificationSource::Unassigned => "unassigned",
        }
    }
}

impl Classification {
    pub fn label(&self) -> Option<&CategoryLabel> {
        match self {
            Classification::RuleMatch { label, .. } | Classification::ModelScore { label, .. } => {
                Some(label)
            }
            Classification::Unassigned => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Classification::RuleMatch { .. } => 1.0,
            Classification::ModelScore { confidence, .. } => *confidence,
            Classification::Unassigned => 0.0,
        }
    }

    pub fn source(&self) -> ClassificationSource {
        match self {
            Classification::RuleMatch { .. } => ClassificationSource::Rule,
            Classification::ModelScore { .. } => ClassificationSource::Model,
            Classification::Unassigned => ClassificationSource::Unassigned,
        }
    }

    pub fn matched_keyword(&self) -> Option<&str> {
        match self {
            Classification::RuleMatch { keyword, .. } => Some(keyword),
            _ => None,
        }
    }
}

// ============================================================================
// CATEGORIZED TRANSACTION
// ============================================================================

/// A transaction plus its category decision; the transaction itself is
/// never modified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedTransaction {
    pub transaction: Transaction,
    pub classification: Classification,
    pub needs_review: bool,
}

impl CategorizedTransaction {
    pub fn category(&self) -> &str {
        self.classification
            .label()
            .map(|l| l.category.as_str())
            .unwrap_or(UNASSIGNED_CATEGORY)
    }

    pub fn subcategory(&self) -> &str {
        self.classification
            .label()
            .map(|l| l.subcategory.as_str())
            .unwrap_or("")
    }

    pub fn confidence(&self) -> f64 {
        self.classification.confidence()
    }

    pub fn source(&self) -> ClassificationSource {
        self.classification.source()
    }
}

// ============================================================================
// CATEGORIZER
// ============================================================================

pub struct Categorizer {
    rules: RuleEngine,
    model: LearnedClassifier,
    confidence_threshold: f64,
}

impl Categorizer {
    /// Rules only; attach a model with `with_model`
    pub fn new(taxonomy: &Taxonomy, config: &MlConfig) -> Self {
        Categorizer {
            rules: RuleEngine::from_taxonomy(taxonomy),
            model: LearnedClassifier::new(),
            confidence_threshold: config.confidence_threshold,
        }
    }

    /// Builder pattern: learned classifier for the second pass
    pub fn with_model(mut self, model: LearnedClassifier) -> Self {
        self.model = model;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_trained()
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Run both stages for one transaction
    pub fn classify(&self, tx: &Transaction) -> Classification {
        if let Some(hit) = self.rules.classify(tx) {
            return Classification::RuleMatch {
                label: hit.label,
                keyword: hit.keyword,
            };
        }

        match self.model.predict(tx) {
            Ok(prediction) => {
                if prediction.out_of_vocabulary {
                    log::debug!(
                        "{}: no known terms in '{}', scored on metadata only",
                        tx.id_str(),
                        tx.description
                    );
                }
                Classification::ModelScore {
                    label: prediction.label,
                    confidence: prediction.confidence,
                }
            }
            Err(PredictionError::ModelNotTrained) => Classification::Unassigned,
        }
    }

    pub fn categorize(&self, transaction: Transaction) -> CategorizedTransaction {
        let classification = self.classify(&transaction);
        let needs_review = classification.confidence() < self.confidence_threshold;
        CategorizedTransaction {
            transaction,
            classification,
            needs_review,
        }
    }

    /// Categorize a whole table, preserving order
    pub fn categorize_all(&self, transactions: Vec<Transaction>) -> Vec<CategorizedTransaction> {
        let categorized: Vec<CategorizedTransaction> = transactions
            .into_iter()
            .map(|tx| self.categorize(tx))
            .collect();

        let stats = CategoryStats::from_records(&categorized);
        log::info!(
            "categorized {}/{} transactions ({} by rule, {} by model), {} need review",
            stats.categorized,
            stats.total,
            stats.count_for(ClassificationSource::Rule),
            stats.count_for(ClassificationSource::Model),
            stats.needs_review
        );

        categorized
    }
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub categorized: usize,
    pub uncategorized: usize,
    pub categorization_rate: f64,
    pub needs_review: usize,
    pub by_source: BTreeMap<ClassificationSource, usize>,
    /// Keyed by `category/subcategory`
    pub by_subcategory: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Net amount per category
    pub amount_by_category: BTreeMap<String, Decimal>,
}

impl CategoryStats {
    pub fn from_records(records: &[CategorizedTransaction]) -> Self {
        let mut stats = CategoryStats {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            *stats.by_source.entry(record.source()).or_insert(0) += 1;
            if record.needs_review {
                stats.needs_review += 1;
            }

            let category = record.category().to_string();
            match record.classification.label() {
                Some(label) => {
                    stats.categorized += 1;
                    *stats.by_subcategory.entry(label.key()).or_insert(0) += 1;
                }
                None => stats.uncategorized += 1,
            }
            *stats.by_category.entry(category.clone()).or_insert(0) += 1;
            *stats
                .amount_by_category
                .entry(category)
                .or_insert(Decimal::ZERO) += record.transaction.amount;
        }

        if stats.total > 0 {
            stats.categorization_rate = stats.categorized as f64 / stats.total as f64;
        }
        stats
    }

    pub fn count_for(&self, source: ClassificationSource) -> usize {
        self.by_source.get(&source).copied().unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
