// 🏷️ Classification Rules - Rules as Data
// Keyword triggers from the category taxonomy, matched against transaction text

use crate::config::CategorizerConfig;
use crate::taxonomy::{CategoryLabel, Taxonomy};
use crate::transaction::Transaction;
use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct KeywordRule {
    /// Rule ID for tracking, e.g. `Food/groceries#0`
    pub id: String,

    /// Lowercased keyword, matched as a substring
    pub keyword: String,

    /// Label assigned when the keyword hits
    pub label: CategoryLabel,
}

impl KeywordRule {
    /// Check if the keyword occurs in already-lowercased text
    pub fn matches(&self, text_lower: &str) -> bool {
        text_lower.contains(&self.keyword)
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// A keyword decision; always full confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub label: CategoryLabel,
    /// Keyword as written in the taxonomy
    pub keyword: String,
    pub rule_id: String,
}

// ============================================================================
// RULE ENGINE
// ============================================================================

pub struct RuleEngine {
    /// Taxonomy declaration order; first hit wins
    rules: Vec<KeywordRule>,
    /// Keywords as configured, parallel to `rules`
    originals: Vec<String>,
}

impl RuleEngine {
    /// Compile every non-empty keyword of the taxonomy, in declaration order
    pub fn from_taxonomy(taxonomy: &Taxonomy) -> Self {
        let mut rules = Vec::new();
        let mut originals = Vec::new();

        for (category, subcategory) in taxonomy.subcategories() {
            let label = CategoryLabel::new(&category.name, &subcategory.name);
            for (index, keyword) in subcategory.keywords.iter().enumerate() {
                let normalized = keyword.trim().to_lowercase();
                if normalized.is_empty() {
                    continue;
                }
                rules.push(KeywordRule {
                    id: format!("{}#{}", label.key(), index),
                    keyword: normalized,
                    label: label.clone(),
                });
                originals.push(keyword.trim().to_string());
            }
        }

        RuleEngine { rules, originals }
    }

    /// Load the taxonomy from a categories JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = CategorizerConfig::from_file(path.as_ref())
            .with_context(|| format!("Failed to load categories file: {:?}", path.as_ref()))?;

        Ok(RuleEngine::from_taxonomy(&config.taxonomy))
    }

    /// Match free text (description + counterparty)
    pub fn classify_text(&self, text: &str) -> Option<RuleMatch> {
        let text_lower = text.to_lowercase();

        self.rules
            .iter()
            .zip(&self.originals)
            .find(|(rule, _)| rule.matches(&text_lower))
            .map(|(rule, original)| RuleMatch {
                label: rule.label.clone(),
                keyword: original.clone(),
                rule_id: rule.id.clone(),
            })
    }

    /// Apply rules to one transaction
    pub fn classify(&self, tx: &Transaction) -> Option<RuleMatch> {
        self.classify_text(&tx.classification_text())
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

// ============================================================================
// TESTS
// ============================================================================
