// Categorizer configuration - taxonomy + ML hyperparameters
//
// Mirrors the categories.json document edited by the category management
// screens: {"categories": {cat: {sub: {"keywords": [..]}}}, "ml_config": {..}}

use crate::error::ConfigError;
use crate::taxonomy::{Category, Subcategory, Taxonomy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

// ============================================================================
// ML CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlConfig {
    /// Training is refused below this many labeled rows
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Every label needs at least this many rows
    #[serde(default = "default_min_samples_per_label")]
    pub min_samples_per_label: usize,

    /// Fraction of labeled rows held out for validation
    #[serde(default = "default_validation_split", alias = "test_size")]
    pub validation_split: f64,

    /// Final confidence below this marks a record for review
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Seed for the deterministic validation split
    #[serde(default = "default_random_seed", alias = "random_state")]
    pub random_seed: u64,

    /// Vocabulary cap for the text features
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    /// Weight of one-hot metadata features relative to text features
    #[serde(default = "default_metadata_weight")]
    pub metadata_weight: f64,
}

fn default_min_training_samples() -> usize {
    50
}

fn default_min_samples_per_label() -> usize {
    3
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_random_seed() -> u64 {
    42
}

fn default_max_features() -> usize {
    1000
}

fn default_metadata_weight() -> f64 {
    0.25
}

impl Default for MlConfig {
    fn default() -> Self {
        MlConfig {
            min_training_samples: default_min_training_samples(),
            min_samples_per_label: default_min_samples_per_label(),
            validation_split: default_validation_split(),
            confidence_threshold: default_confidence_threshold(),
            random_seed: default_random_seed(),
            max_features: default_max_features(),
            metadata_weight: default_metadata_weight(),
        }
    }
}

impl MlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ConfigError::InvalidMlConfig(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidMlConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.max_features == 0 {
            return Err(ConfigError::InvalidMlConfig(
                "max_features must be positive".to_string(),
            ));
        }
        if self.metadata_weight < 0.0 {
            return Err(ConfigError::InvalidMlConfig(
                "metadata_weight must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CATEGORIZER CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategorizerConfig {
    pub taxonomy: Taxonomy,
    pub ml: MlConfig,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    categories: Map<String, Value>,
    #[serde(default)]
    ml_config: MlConfig,
}

#[derive(Deserialize)]
struct RawSubcategory {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    description: String,
}

impl CategorizerConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;
        raw.ml_config.validate()?;

        let mut categories = Vec::with_capacity(raw.categories.len());
        for (category_name, subcategories) in raw.categories {
            let Value::Object(subcategories) = subcategories else {
                return Err(ConfigError::InvalidTaxonomy(format!(
                    "category `{category_name}` must map subcategory names to objects"
                )));
            };

            let mut subs = Vec::with_capacity(subcategories.len());
            for (sub_name, body) in subcategories {
                let body: RawSubcategory = serde_json::from_value(body)?;
                subs.push(Subcategory {
                    name: sub_name,
                    description: body.description,
                    keywords: body.keywords,
                });
            }
            categories.push(Category::new(category_name, subs));
        }

        Ok(CategorizerConfig {
            taxonomy: Taxonomy::new(categories)?,
            ml: raw.ml_config,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::CategoryLabel;

    const CONFIG: &str = r#"{
        "categories": {
            "Transport": {
                "public": {"keywords": ["ns.nl", "gvb"], "description": "Trains and trams"}
            },
            "Food": {
                "restaurants": {"keywords": ["thuisbezorgd"]},
                "groceries": {"keywords": ["albert heijn", "jumbo"]}
            }
        },
        "ml_config": {"min_training_samples": 30, "test_size": 0.25, "random_state": 7}
    }"#;

    #[test]
    fn test_declaration_order_is_preserved() {
        let config = CategorizerConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(
            config.taxonomy.labels(),
            vec![
                CategoryLabel::new("Transport", "public"),
                CategoryLabel::new("Food", "restaurants"),
                CategoryLabel::new("Food", "groceries"),
            ]
        );
        let public = config
            .taxonomy
            .subcategory(&CategoryLabel::new("Transport", "public"))
            .unwrap();
        assert_eq!(public.description, "Trains and trams");
    }

    #[test]
    fn test_ml_config_aliases_and_defaults() {
        let config = CategorizerConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.ml.min_training_samples, 30);
        assert_eq!(config.ml.validation_split, 0.25);
        assert_eq!(config.ml.random_seed, 7);
        assert_eq!(config.ml.confidence_threshold, 0.7);
        assert_eq!(config.ml.min_samples_per_label, 3);
    }

    #[test]
    fn test_missing_ml_config_uses_defaults() {
        let config = CategorizerConfig::from_json_str(r#"{"categories": {}}"#).unwrap();
        assert_eq!(config.ml, MlConfig::default());
        assert_eq!(config.taxonomy.subcategory_count(), 0);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = CategorizerConfig::from_json_str(
            r#"{"categories": {}, "ml_config": {"confidence_threshold": 1.5}}"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidMlConfig(_))));
    }

    #[test]
    fn test_malformed_category_rejected() {
        let result = CategorizerConfig::from_json_str(r#"{"categories": {"Food": ["x"]}}"#);
        assert!(matches!(result, Err(ConfigError::InvalidTaxonomy(_))));
    }
}
