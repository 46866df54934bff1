// 🏷️ Category Taxonomy - two-level category tree with keyword triggers
//
// Category → ordered subcategories → keywords. Built once from configuration
// and never mutated while a run is in progress. Declaration order matters:
// the rule classifier resolves overlapping keywords by it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// CATEGORY LABEL
// ============================================================================

/// A (category, subcategory) pair - the unit every classifier predicts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub category: String,
    pub subcategory: String,
}

impl CategoryLabel {
    pub fn new(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        CategoryLabel {
            category: category.into(),
            subcategory: subcategory.into(),
        }
    }

    /// Stable string key, e.g. `Food/groceries`
    pub fn key(&self) -> String {
        format!("{}/{}", self.category, self.subcategory)
    }

    /// Labels the labeling UI emits for rows nobody categorized yet
    pub fn is_placeholder(&self) -> bool {
        let category = self.category.trim();
        category.is_empty() || category.eq_ignore_ascii_case("unknown")
    }
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.category, self.subcategory)
    }
}

// ============================================================================
// TREE NODES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subcategory {
    pub name: String,
    pub description: String,
    /// Keyword triggers (any language); matched case-insensitively
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    pub fn new(name: impl Into<String>, subcategories: Vec<Subcategory>) -> Self {
        Category {
            name: name.into(),
            subcategories,
        }
    }
}

impl Subcategory {
    pub fn new(name: impl Into<String>, keywords: &[&str]) -> Self {
        Subcategory {
            name: name.into(),
            description: String::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ============================================================================
// TAXONOMY
// ============================================================================

/// Immutable category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    categories: Vec<Category>,
}

impl Taxonomy {
    /// Build a taxonomy, rejecting empty names and duplicate nodes.
    pub fn new(categories: Vec<Category>) -> Result<Self, ConfigError> {
        let mut seen_categories = HashSet::new();

        for category in &categories {
            if category.name.trim().is_empty() {
                return Err(ConfigError::InvalidTaxonomy(
                    "category with an empty name".to_string(),
                ));
            }
            if !seen_categories.insert(category.name.as_str()) {
                return Err(ConfigError::InvalidTaxonomy(format!(
                    "category `{}` declared twice",
                    category.name
                )));
            }

            let mut seen_subcategories = HashSet::new();
            for sub in &category.subcategories {
                if sub.name.trim().is_empty() {
                    return Err(ConfigError::InvalidTaxonomy(format!(
                        "category `{}` has a subcategory with an empty name",
                        category.name
                    )));
                }
                if !seen_subcategories.insert(sub.name.as_str()) {
                    return Err(ConfigError::InvalidTaxonomy(format!(
                        "subcategory `{}/{}` declared twice",
                        category.name, sub.name
                    )));
                }
            }
        }

        Ok(Taxonomy { categories })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// All (category, subcategory) nodes in declaration order
    pub fn subcategories(&self) -> impl Iterator<Item = (&Category, &Subcategory)> {
        self.categories
            .iter()
            .flat_map(|c| c.subcategories.iter().map(move |s| (c, s)))
    }

    /// All labels in declaration order
    pub fn labels(&self) -> Vec<CategoryLabel> {
        self.subcategories()
            .map(|(c, s)| CategoryLabel::new(c.name.clone(), s.name.clone()))
            .collect()
    }

    pub fn contains(&self, label: &CategoryLabel) -> bool {
        self.subcategory(label).is_some()
    }

    pub fn subcategory(&self, label: &CategoryLabel) -> Option<&Subcategory> {
        self.categories
            .iter()
            .find(|c| c.name == label.category)?
            .subcategories
            .iter()
            .find(|s| s.name == label.subcategory)
    }

    pub fn subcategory_count(&self) -> usize {
        self.categories.iter().map(|c| c.subcategories.len()).sum()
    }

    pub fn keyword_count(&self) -> usize {
        self.subcategories().map(|(_, s)| s.keywords.len()).sum()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Taxonomy {
        Taxonomy::new(vec![
            Category::new(
                "Food",
                vec![
                    Subcategory::new("groceries", &["albert heijn", "jumbo"]),
                    Subcategory::new("restaurants", &["thuisbezorgd"]),
                ],
            ),
            Category::new("Transport", vec![Subcategory::new("public", &["ns ", "gvb"])]),
        ])
        .unwrap()
    }

    #[test]
    fn test_labels_follow_declaration_order() {
        let labels = sample().labels();
        let keys: Vec<String> = labels.iter().map(|l| l.key()).collect();
        assert_eq!(
            keys,
            vec!["Food/groceries", "Food/restaurants", "Transport/public"]
        );
    }

    #[test]
    fn test_contains_and_lookup() {
        let taxonomy = sample();
        assert!(taxonomy.contains(&CategoryLabel::new("Food", "groceries")));
        assert!(!taxonomy.contains(&CategoryLabel::new("Food", "public")));
        assert_eq!(taxonomy.subcategory_count(), 3);
        assert_eq!(taxonomy.keyword_count(), 5);
    }

    #[test]
    fn test_duplicate_subcategory_rejected() {
        let result = Taxonomy::new(vec![Category::new(
            "Food",
            vec![
                Subcategory::new("groceries", &[]),
                Subcategory::new("groceries", &[]),
            ],
        )]);
        assert!(matches!(result, Err(ConfigError::InvalidTaxonomy(_))));
    }

    #[test]
    fn test_placeholder_label() {
        assert!(CategoryLabel::new("unknown", "").is_placeholder());
        assert!(CategoryLabel::new("  ", "x").is_placeholder());
        assert!(!CategoryLabel::new("Food", "groceries").is_placeholder());
    }
}
