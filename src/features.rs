// Feature extraction - TF-IDF over transaction text plus one-hot metadata
//
// Layout of a feature vector:
//   [0, vocabulary)                    TF-IDF weights, L2-normalized
//   [vocabulary, vocabulary + 40)      metadata one-hots scaled by metadata_weight

use crate::transaction::Transaction;
use chrono::{Datelike, Timelike, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Bump when tokenization, vocabulary selection or the metadata layout change.
/// Persisted models with another version must be retrained.
pub const FEATURE_PIPELINE_VERSION: u32 = 1;

/// Terms in more than this fraction of documents are dropped
pub const MAX_DOCUMENT_FREQUENCY: f64 = 0.95;

/// Sparse feature vector: (index, value) sorted by index
pub type SparseVector = Vec<(usize, f64)>;

// ============================================================================
// TOKENIZATION
// ============================================================================

/// Lowercased word tokens of two or more characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Unigrams followed by bigrams.
pub fn ngrams(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let bigrams: Vec<String> = tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect();

    let mut terms = tokens;
    terms.extend(bigrams);
    terms
}

// ============================================================================
// TF-IDF
// ============================================================================

/// TF-IDF vectorizer with a capped vocabulary and smoothed IDF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfIdfVectorizer {
    /// Term -> column index (indices follow lexicographic term order)
    vocabulary: BTreeMap<String, usize>,
    /// Inverse document frequency per column
    idf: Vec<f64>,
    n_documents: usize,
}

impl TfIdfVectorizer {
    /// Fit on training documents.
    ///
    /// Drops terms above `MAX_DOCUMENT_FREQUENCY`, then keeps the
    /// `max_features` most frequent terms (ties broken alphabetically).
    pub fn fit(documents: &[String], max_features: usize) -> Self {
        let n_documents = documents.len();
        let mut term_frequency: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let terms = ngrams(doc);
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            for term in &terms {
                *term_frequency.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let max_doc_count = MAX_DOCUMENT_FREQUENCY * n_documents as f64;
        let mut candidates: Vec<(String, usize)> = term_frequency
            .into_iter()
            .filter(|(term, _)| document_frequency[term] as f64 <= max_doc_count)
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(max_features);

        let mut kept: Vec<String> = candidates.into_iter().map(|(term, _)| term).collect();
        kept.sort();

        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(kept.len());
        for (index, term) in kept.into_iter().enumerate() {
            let df = document_frequency[&term];
            // IDF = ln((N + 1) / (df + 1)) + 1
            idf.push(((n_documents as f64 + 1.0) / (df as f64 + 1.0)).ln() + 1.0);
            vocabulary.insert(term, index);
        }

        TfIdfVectorizer {
            vocabulary,
            idf,
            n_documents,
        }
    }

    /// Transform a document; out-of-vocabulary text yields an empty vector.
    pub fn transform(&self, document: &str) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for term in ngrams(document) {
            if let Some(&index) = self.vocabulary.get(&term) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        let mut weighted: SparseVector = counts
            .into_iter()
            .map(|(index, tf)| (index, tf * self.idf[index]))
            .collect();

        let norm = weighted.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, value) in weighted.iter_mut() {
                *value /= norm;
            }
        }
        weighted
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }
}

// ============================================================================
// METADATA
// ============================================================================

const AMOUNT_BUCKETS: usize = 5;
const SIGN_SLOTS: usize = 2;
const WEEKDAY_SLOTS: usize = 7;
const WEEKEND_SLOTS: usize = 2;
const HOUR_SLOTS: usize = 24;

pub const METADATA_DIMENSIONS: usize =
    AMOUNT_BUCKETS + SIGN_SLOTS + WEEKDAY_SLOTS + WEEKEND_SLOTS + HOUR_SLOTS;

/// Magnitude bucket of an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountBucket {
    VerySmall,
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl AmountBucket {
    /// Buckets on the absolute amount with edges at 10, 50, 200 and 1000
    pub fn of(amount: Decimal) -> Self {
        let abs = amount.abs();
        if abs < Decimal::from(10) {
            AmountBucket::VerySmall
        } else if abs < Decimal::from(50) {
            AmountBucket::Small
        } else if abs < Decimal::from(200) {
            AmountBucket::Medium
        } else if abs < Decimal::from(1000) {
            AmountBucket::Large
        } else {
            AmountBucket::VeryLarge
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// Active one-hot slots of a transaction's metadata
pub fn metadata_slots(tx: &Transaction) -> Vec<usize> {
    let mut slots = Vec::with_capacity(5);
    let mut offset = 0;

    slots.push(offset + AmountBucket::of(tx.amount).slot());
    offset += AMOUNT_BUCKETS;

    slots.push(offset + usize::from(tx.is_income()));
    offset += SIGN_SLOTS;

    let weekday = tx.date.weekday();
    slots.push(offset + weekday.num_days_from_monday() as usize);
    offset += WEEKDAY_SLOTS;

    let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
    slots.push(offset + usize::from(weekend));
    offset += WEEKEND_SLOTS;

    if let Some(time) = tx.time {
        slots.push(offset + time.hour() as usize);
    }

    slots
}

// ============================================================================
// FEATURE EXTRACTOR
// ============================================================================

/// Fitted text + metadata pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExtractor {
    tfidf: TfIdfVectorizer,
    metadata_weight: f64,
}

impl FeatureExtractor {
    pub fn fit(transactions: &[&Transaction], max_features: usize, metadata_weight: f64) -> Self {
        let documents: Vec<String> = transactions
            .iter()
            .map(|tx| tx.classification_text())
            .collect();

        FeatureExtractor {
            tfidf: TfIdfVectorizer::fit(&documents, max_features),
            metadata_weight,
        }
    }

    /// Total number of feature columns
    pub fn dimensions(&self) -> usize {
        self.tfidf.vocabulary_size() + METADATA_DIMENSIONS
    }

    pub fn tfidf(&self) -> &TfIdfVectorizer {
        &self.tfidf
    }

    pub fn transform(&self, tx: &Transaction) -> SparseVector {
        let mut features = self.tfidf.transform(&tx.classification_text());

        if self.metadata_weight > 0.0 {
            let offset = self.tfidf.vocabulary_size();
            features.extend(
                metadata_slots(tx)
                    .into_iter()
                    .map(|slot| (offset + slot, self.metadata_weight)),
            );
        }
        features
    }

    /// True when none of the transaction's text is in the vocabulary
    pub fn is_out_of_vocabulary(&self, tx: &Transaction) -> bool {
        self.tfidf.transform(&tx.classification_text()).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::str::FromStr;

    fn docs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_and_bigrams() {
        assert_eq!(tokenize("ALBERT HEIJN 1234 NL, a"), vec!["albert", "heijn", "1234", "nl"]);
        assert_eq!(
            ngrams("Albert Heijn NL"),
            vec!["albert", "heijn", "nl", "albert heijn", "heijn nl"]
        );
    }

    #[test]
    fn test_max_df_drops_ubiquitous_terms() {
        let vectorizer = TfIdfVectorizer::fit(
            &docs(&["betaling albert", "betaling jumbo", "betaling ns"]),
            1000,
        );
        assert!(!vectorizer.contains_term("betaling"));
        assert!(vectorizer.contains_term("jumbo"));
        assert!(vectorizer.contains_term("betaling jumbo"));
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let vectorizer = TfIdfVectorizer::fit(&docs(&["aa aa aa", "bb bb", "cc", "dd"]), 2);
        assert_eq!(vectorizer.vocabulary_size(), 2);
        assert!(vectorizer.contains_term("aa"));
        // "aa aa" bigram (2) ties with "bb" (2); alphabetical order keeps "aa aa"
        assert!(vectorizer.contains_term("aa aa"));
    }

    #[test]
    fn test_transform_is_l2_normalized() {
        let vectorizer = TfIdfVectorizer::fit(&docs(&["albert heijn", "jumbo", "ns reis"]), 1000);
        let vector = vectorizer.transform("Albert Heijn");
        let norm: f64 = vector.iter().map(|(_, v)| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(vectorizer.transform("completely unseen").is_empty());
    }

    #[test]
    fn test_amount_buckets() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(AmountBucket::of(d("-9.99")), AmountBucket::VerySmall);
        assert_eq!(AmountBucket::of(d("-45.00")), AmountBucket::Small);
        assert_eq!(AmountBucket::of(d("50")), AmountBucket::Medium);
        assert_eq!(AmountBucket::of(d("999.99")), AmountBucket::Large);
        assert_eq!(AmountBucket::of(d("2500")), AmountBucket::VeryLarge);
    }

    #[test]
    fn test_metadata_slots() {
        // 2024-03-02 is a Saturday
        let tx = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            Decimal::from(-45),
            "x",
        );
        assert_eq!(metadata_slots(&tx), vec![1, 5, 12, 15]);

        let timed = tx.with_time(NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(metadata_slots(&timed).last(), Some(&(16 + 14)));
    }

    #[test]
    fn test_extractor_dimensions_and_offset() {
        let a = Transaction::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Decimal::from(-5), "jumbo");
        let b = Transaction::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), Decimal::from(-5), "ns reis");
        let extractor = FeatureExtractor::fit(&[&a, &b], 1000, 0.25);

        let vocab = extractor.tfidf().vocabulary_size();
        assert_eq!(extractor.dimensions(), vocab + METADATA_DIMENSIONS);

        let features = extractor.transform(&a);
        assert!(features.iter().any(|&(i, v)| i >= vocab && (v - 0.25).abs() < 1e-12));
        assert!(!extractor.is_out_of_vocabulary(&a));
    }
}
