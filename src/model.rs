// 🧠 Learned Classifier - text + metadata model over labeled transactions
//
// Multinomial naive Bayes on the feature layout from `features`, with
// balanced class weights. Training is one blocking call; the fitted state
// is a plain serializable value owned by `LearnedClassifier`.

use crate::config::MlConfig;
use crate::error::{PredictionError, TrainingError};
use crate::features::{FeatureExtractor, SparseVector, FEATURE_PIPELINE_VERSION};
use crate::identity::canonical_identity_string;
use crate::taxonomy::{CategoryLabel, Taxonomy};
use crate::training_data::LabeledTransaction;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Additive smoothing for feature likelihoods
const SMOOTHING_ALPHA: f64 = 1.0;

// ============================================================================
// NAIVE BAYES
// ============================================================================

/// Fitted multinomial naive Bayes parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayes {
    /// ln P(class), one per label
    class_log_prior: Vec<f64>,
    /// ln P(feature | class), `[class][feature]`
    feature_log_prob: Vec<Vec<f64>>,
}

impl NaiveBayes {
    /// Fit on `(features, class index)` rows with one weight per class.
    fn fit(rows: &[(SparseVector, usize)], n_classes: usize, dimensions: usize, class_weight: &[f64]) -> Self {
        let mut feature_count = vec![vec![0.0; dimensions]; n_classes];
        let mut class_count = vec![0.0; n_classes];

        for (features, class) in rows {
            let weight = class_weight[*class];
            class_count[*class] += weight;
            for &(index, value) in features {
                feature_count[*class][index] += weight * value;
            }
        }

        let total: f64 = class_count.iter().sum();
        let class_log_prior = class_count
            .iter()
            .map(|&c| if c > 0.0 { (c / total).ln() } else { f64::NEG_INFINITY })
            .collect();

        let feature_log_prob = feature_count
            .into_iter()
            .map(|counts| {
                let denominator = counts.iter().sum::<f64>() + SMOOTHING_ALPHA * dimensions as f64;
                counts
                    .into_iter()
                    .map(|c| ((c + SMOOTHING_ALPHA) / denominator).ln())
                    .collect()
            })
            .collect();

        NaiveBayes {
            class_log_prior,
            feature_log_prob,
        }
    }

    /// Posterior probability per class
    fn predict_proba(&self, features: &SparseVector) -> Vec<f64> {
        let joint: Vec<f64> = self
            .class_log_prior
            .iter()
            .zip(&self.feature_log_prob)
            .map(|(prior, log_prob)| {
                prior
                    + features
                        .iter()
                        .map(|&(index, value)| value * log_prob[index])
                        .sum::<f64>()
            })
            .collect();

        let max = joint.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = joint.iter().map(|j| (j - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / sum).collect()
    }
}

// ============================================================================
// TRAINED MODEL STATE
// ============================================================================

/// Everything needed to score a transaction, plus provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub feature_pipeline_version: u32,
    /// Class order of the classifier
    pub labels: Vec<CategoryLabel>,
    pub training_samples: usize,
    extractor: FeatureExtractor,
    classifier: NaiveBayes,
}

impl TrainedModel {
    /// Why this model cannot be used with the current taxonomy, if at all
    pub fn incompatibility(&self, taxonomy: &Taxonomy) -> Option<String> {
        if self.feature_pipeline_version != FEATURE_PIPELINE_VERSION {
            return Some(format!(
                "feature pipeline version {} differs from current version {}",
                self.feature_pipeline_version, FEATURE_PIPELINE_VERSION
            ));
        }

        self.labels
            .iter()
            .find(|label| !taxonomy.contains(label))
            .map(|label| format!("label `{}` is no longer in the taxonomy", label.key()))
    }

    pub fn is_compatible(&self, taxonomy: &Taxonomy) -> bool {
        self.incompatibility(taxonomy).is_none()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.extractor.tfidf().vocabulary_size()
    }

    fn predict(&self, tx: &Transaction) -> ModelPrediction {
        let probabilities = self.classifier.predict_proba(&self.extractor.transform(tx));

        let (best, confidence) = probabilities
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, &p)| {
                if p > bp {
                    (i, p)
                } else {
                    (bi, bp)
                }
            });

        ModelPrediction {
            label: self.labels[best].clone(),
            confidence,
            out_of_vocabulary: self.extractor.is_out_of_vocabulary(tx),
        }
    }
}

/// Classifier decision for one transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPrediction {
    pub label: CategoryLabel,
    /// Probability of the predicted class
    pub confidence: f64,
    /// No text token was known; the score rests on metadata and priors
    pub out_of_vocabulary: bool,
}

// ============================================================================
// TRAINING REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Validation rows carrying this label
    pub support: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub model_id: Uuid,
    pub accuracy: f64,
    /// Keyed by `category/subcategory`
    pub per_label: BTreeMap<String, LabelMetrics>,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub discarded_samples: usize,
    /// Set when the split left no validation rows and metrics were computed
    /// on the training rows instead
    pub evaluated_on_training: bool,
    pub vocabulary_size: usize,
}

// ============================================================================
// LEARNED CLASSIFIER
// ============================================================================

#[derive(Debug, Default)]
pub struct LearnedClassifier {
    state: Option<TrainedModel>,
}

impl LearnedClassifier {
    pub fn new() -> Self {
        LearnedClassifier { state: None }
    }

    /// Wrap a model restored from a `ModelStore`
    pub fn from_model(model: TrainedModel) -> Self {
        LearnedClassifier { state: Some(model) }
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_some()
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.state.as_ref()
    }

    /// Fit on labeled transactions, replacing any previous model.
    ///
    /// The model is first fitted on a stratified split to produce metrics,
    /// then refitted on every usable sample.
    pub fn train(
        &mut self,
        samples: &[LabeledTransaction],
        taxonomy: &Taxonomy,
        config: &MlConfig,
    ) -> Result<TrainingReport, TrainingError> {
        let usable: Vec<&LabeledTransaction> =
            samples.iter().filter(|s| !s.label.is_placeholder()).collect();
        let discarded = samples.len() - usable.len();

        if let Some(unknown) = usable.iter().find(|s| !taxonomy.contains(&s.label)) {
            return Err(TrainingError::UnknownLabel {
                label: unknown.label.key(),
            });
        }

        if usable.len() < config.min_training_samples {
            return Err(TrainingError::InsufficientSamples {
                found: usable.len(),
                required: config.min_training_samples,
            });
        }

        // Class order follows the taxonomy
        let mut per_label: HashMap<&CategoryLabel, usize> = HashMap::new();
        for sample in &usable {
            *per_label.entry(&sample.label).or_insert(0) += 1;
        }
        let labels: Vec<CategoryLabel> = taxonomy
            .labels()
            .into_iter()
            .filter(|l| per_label.contains_key(l))
            .collect();

        if labels.len() < 2 {
            return Err(TrainingError::ImbalancedLabels {
                reason: format!("need at least 2 distinct labels, found {}", labels.len()),
            });
        }
        if let Some(thin) = labels
            .iter()
            .find(|l| per_label[l] < config.min_samples_per_label)
        {
            return Err(TrainingError::ImbalancedLabels {
                reason: format!(
                    "label `{}` has {} samples, at least {} required",
                    thin.key(),
                    per_label[thin],
                    config.min_samples_per_label
                ),
            });
        }

        let class_of: HashMap<&CategoryLabel, usize> =
            labels.iter().enumerate().map(|(i, l)| (l, i)).collect();
        let classes: Vec<usize> = usable.iter().map(|s| class_of[&s.label]).collect();

        let (train_idx, validation_idx) =
            stratified_split(&usable, &classes, labels.len(), config);
        let evaluated_on_training = validation_idx.is_empty();
        let eval_idx = if evaluated_on_training {
            &train_idx
        } else {
            &validation_idx
        };

        let trial = fit_model(&usable, &classes, &train_idx, &labels, config);
        let predicted: Vec<usize> = eval_idx
            .iter()
            .map(|&i| {
                let label = trial.predict(&usable[i].transaction).label;
                class_of[&label]
            })
            .collect();
        let actual: Vec<usize> = eval_idx.iter().map(|&i| classes[i]).collect();
        let (accuracy, metrics) = evaluate(&actual, &predicted, labels.len());

        let all_idx: Vec<usize> = (0..usable.len()).collect();
        let model = fit_model(&usable, &classes, &all_idx, &labels, config);

        let report = TrainingReport {
            model_id: model.model_id,
            accuracy,
            per_label: labels
                .iter()
                .zip(metrics)
                .map(|(l, m)| (l.key(), m))
                .collect(),
            training_samples: train_idx.len(),
            validation_samples: validation_idx.len(),
            discarded_samples: discarded,
            evaluated_on_training,
            vocabulary_size: model.vocabulary_size(),
        };

        log::info!(
            "trained model {} on {} samples ({} labels), validation accuracy {:.3}",
            model.model_id,
            usable.len(),
            labels.len(),
            accuracy
        );

        self.state = Some(model);
        Ok(report)
    }

    /// Score one transaction with the fitted model.
    pub fn predict(&self, tx: &Transaction) -> Result<ModelPrediction, PredictionError> {
        self.state
            .as_ref()
            .map(|model| model.predict(tx))
            .ok_or(PredictionError::ModelNotTrained)
    }
}

fn fit_model(
    samples: &[&LabeledTransaction],
    classes: &[usize],
    indices: &[usize],
    labels: &[CategoryLabel],
    config: &MlConfig,
) -> TrainedModel {
    let transactions: Vec<&Transaction> = indices.iter().map(|&i| &samples[i].transaction).collect();
    let extractor = FeatureExtractor::fit(&transactions, config.max_features, config.metadata_weight);

    // Balanced weights: n / (k * n_c)
    let mut counts = vec![0usize; labels.len()];
    for &i in indices {
        counts[classes[i]] += 1;
    }
    let n = indices.len() as f64;
    let k = counts.iter().filter(|&&c| c > 0).count() as f64;
    let class_weight: Vec<f64> = counts
        .iter()
        .map(|&c| if c > 0 { n / (k * c as f64) } else { 0.0 })
        .collect();

    let rows: Vec<(SparseVector, usize)> = indices
        .iter()
        .map(|&i| (extractor.transform(&samples[i].transaction), classes[i]))
        .collect();
    let classifier = NaiveBayes::fit(&rows, labels.len(), extractor.dimensions(), &class_weight);

    TrainedModel {
        model_id: Uuid::new_v4(),
        trained_at: Utc::now(),
        feature_pipeline_version: FEATURE_PIPELINE_VERSION,
        labels: labels.to_vec(),
        training_samples: indices.len(),
        extractor,
        classifier,
    }
}

/// Deterministic stratified split.
///
/// Within each class, samples are ordered by SHA-256 of the seed and the
/// sample's identity string; the first `round(n_c * split)` go to
/// validation, never leaving a class without training rows.
fn stratified_split(
    samples: &[&LabeledTransaction],
    classes: &[usize],
    n_classes: usize,
    config: &MlConfig,
) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: Vec<Vec<(String, usize)>> = vec![Vec::new(); n_classes];
    for (i, sample) in samples.iter().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(config.random_seed.to_le_bytes());
        hasher.update(canonical_identity_string(&sample.transaction).as_bytes());
        by_class[classes[i]].push((format!("{:x}", hasher.finalize()), i));
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for mut members in by_class {
        members.sort();
        let n_c = members.len();
        let n_val = ((n_c as f64 * config.validation_split).round() as usize).min(n_c.saturating_sub(1));
        for (position, (_, index)) in members.into_iter().enumerate() {
            if position < n_val {
                validation.push(index);
            } else {
                train.push(index);
            }
        }
    }

    train.sort_unstable();
    validation.sort_unstable();
    (train, validation)
}

/// Accuracy and per-class precision/recall/F1/support
fn evaluate(actual: &[usize], predicted: &[usize], n_classes: usize) -> (f64, Vec<LabelMetrics>) {
    let total = actual.len();
    let correct = actual.iter().zip(predicted).filter(|(a, p)| a == p).count();
    let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let metrics = (0..n_classes)
        .map(|class| {
            let tp = actual
                .iter()
                .zip(predicted)
                .filter(|(&a, &p)| a == class && p == class)
                .count();
            let predicted_count = predicted.iter().filter(|&&p| p == class).count();
            let support = actual.iter().filter(|&&a| a == class).count();

            let precision = ratio(tp, predicted_count);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            LabelMetrics {
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    (accuracy, metrics)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{Category, Subcategory};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(vec![
            Category::new(
                "Food",
                vec![Subcategory::new("groceries", &[]), Subcategory::new("restaurants", &[])],
            ),
            Category::new("Transport", vec![Subcategory::new("public", &[])]),
        ])
        .unwrap()
    }

    fn labeled(i: usize, text: &str, category: &str, subcategory: &str) -> LabeledTransaction {
        let tx = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64 % 28),
            Decimal::from(-20),
            format!("{text} {i}"),
        )
        .with_sequence(i.to_string());
        LabeledTransaction::new(tx, CategoryLabel::new(category, subcategory))
    }

    /// `n` samples spread over three well-separated labels
    fn corpus(n: usize) -> Vec<LabeledTransaction> {
        (0..n)
            .map(|i| match i % 3 {
                0 => labeled(i, "albert heijn supermarkt", "Food", "groceries"),
                1 => labeled(i, "thuisbezorgd pizza", "Food", "restaurants"),
                _ => labeled(i, "ns reizigers trein", "Transport", "public"),
            })
            .collect()
    }

    #[test]
    fn test_predict_without_model() {
        let classifier = LearnedClassifier::new();
        let tx = corpus(1).remove(0).transaction;
        assert_eq!(classifier.predict(&tx), Err(PredictionError::ModelNotTrained));
    }

    #[test]
    fn test_insufficient_samples_boundary() {
        let config = MlConfig::default();
        let mut classifier = LearnedClassifier::new();

        let result = classifier.train(&corpus(49), &taxonomy(), &config);
        assert_eq!(
            result.unwrap_err(),
            TrainingError::InsufficientSamples { found: 49, required: 50 }
        );
        assert!(!classifier.is_trained());

        assert!(classifier.train(&corpus(50), &taxonomy(), &config).is_ok());
        assert!(classifier.is_trained());
    }

    #[test]
    fn test_placeholder_labels_are_discarded() {
        let mut samples = corpus(49);
        samples.push(labeled(99, "onbekend", "unknown", ""));

        let result = LearnedClassifier::new().train(&samples, &taxonomy(), &MlConfig::default());
        assert!(matches!(result, Err(TrainingError::InsufficientSamples { found: 49, .. })));
    }

    #[test]
    fn test_single_label_is_imbalanced() {
        let samples: Vec<_> = (0..60).map(|i| labeled(i, "albert heijn", "Food", "groceries")).collect();
        let result = LearnedClassifier::new().train(&samples, &taxonomy(), &MlConfig::default());
        assert!(matches!(result, Err(TrainingError::ImbalancedLabels { .. })));
    }

    #[test]
    fn test_thin_label_is_imbalanced() {
        let mut samples: Vec<_> = (0..58).map(|i| labeled(i, "albert heijn", "Food", "groceries")).collect();
        samples.push(labeled(58, "ns trein", "Transport", "public"));
        samples.push(labeled(59, "ns trein", "Transport", "public"));

        let result = LearnedClassifier::new().train(&samples, &taxonomy(), &MlConfig::default());
        match result {
            Err(TrainingError::ImbalancedLabels { reason }) => assert!(reason.contains("Transport/public")),
            other => panic!("expected ImbalancedLabels, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_label_rejected() {
        let mut samples = corpus(60);
        samples.push(labeled(60, "bol.com", "Shopping", "online"));

        let result = LearnedClassifier::new().train(&samples, &taxonomy(), &MlConfig::default());
        assert_eq!(
            result.unwrap_err(),
            TrainingError::UnknownLabel { label: "Shopping/online".to_string() }
        );
    }

    #[test]
    fn test_training_report_shape() {
        let mut classifier = LearnedClassifier::new();
        let report = classifier.train(&corpus(60), &taxonomy(), &MlConfig::default()).unwrap();

        assert_eq!(report.training_samples + report.validation_samples, 60);
        assert_eq!(report.validation_samples, 12);
        assert!(!report.evaluated_on_training);
        assert_eq!(report.per_label.len(), 3);
        assert_eq!(report.per_label["Food/groceries"].support, 4);
        assert!((report.accuracy - 1.0).abs() < 1e-9);
        assert_eq!(Some(report.model_id), classifier.model().map(|m| m.model_id));
    }

    #[test]
    fn test_split_is_deterministic() {
        let samples = corpus(60);
        let refs: Vec<&LabeledTransaction> = samples.iter().collect();
        let classes: Vec<usize> = (0..60).map(|i| i % 3).collect();
        let config = MlConfig::default();

        let first = stratified_split(&refs, &classes, 3, &config);
        let second = stratified_split(&refs, &classes, 3, &config);
        assert_eq!(first, second);

        let reseeded = MlConfig { random_seed: 7, ..MlConfig::default() };
        assert_eq!(stratified_split(&refs, &classes, 3, &reseeded).1.len(), 12);
    }

    #[test]
    fn test_no_validation_rows_evaluates_on_training() {
        let config = MlConfig { validation_split: 0.0, ..MlConfig::default() };
        let report = LearnedClassifier::new().train(&corpus(60), &taxonomy(), &config).unwrap();
        assert!(report.evaluated_on_training);
        assert_eq!(report.validation_samples, 0);
    }

    #[test]
    fn test_prediction_and_oov_confidence() {
        let mut classifier = LearnedClassifier::new();
        classifier.train(&corpus(60), &taxonomy(), &MlConfig::default()).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let known = Transaction::new(date, Decimal::from(-20), "thuisbezorgd pizza");
        let unseen = Transaction::new(date, Decimal::from(-20), "qwerty zxcvb");

        let hit = classifier.predict(&known).unwrap();
        assert_eq!(hit.label, CategoryLabel::new("Food", "restaurants"));
        assert!(!hit.out_of_vocabulary);

        let oov = classifier.predict(&unseen).unwrap();
        assert!(oov.out_of_vocabulary);
        assert!(oov.confidence < hit.confidence);
        assert!(oov.confidence > 0.0 && oov.confidence <= 1.0);
    }

    #[test]
    fn test_incompatible_after_taxonomy_change() {
        let mut classifier = LearnedClassifier::new();
        classifier.train(&corpus(60), &taxonomy(), &MlConfig::default()).unwrap();
        let model = classifier.model().unwrap();

        assert!(model.is_compatible(&taxonomy()));

        let shrunk = Taxonomy::new(vec![Category::new(
            "Food",
            vec![Subcategory::new("groceries", &[]), Subcategory::new("restaurants", &[])],
        )])
        .unwrap();
        assert!(model.incompatibility(&shrunk).unwrap().contains("Transport/public"));

        let mut stale = model.clone();
        stale.feature_pipeline_version = FEATURE_PIPELINE_VERSION + 1;
        assert!(!stale.is_compatible(&taxonomy()));
    }
}
