use std::collections::BTreeMap;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod catalog;
pub mod file_repository;
pub mod selector;

pub use catalog::{BuiltinGuidelineRepository, DefectCategory, DEFECT_CATEGORIES};

/// A single guideline the model is asked to check, keyed by rule identifier (e.g. `WCAG 1.4.3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineEntry {
    pub rule_id: String,
    /// Short human-readable name, e.g. "Contrast (Minimum)".
    #[serde(default)]
    pub title: String,
    pub text: String,
}

impl GuidelineEntry {
    pub fn new(
        rule_id: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, GuidelineValidationError> {
        let entry = Self {
            rule_id: rule_id.into(),
            title: title.into(),
            text: text.into(),
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<(), GuidelineValidationError> {
        if self.rule_id.trim().is_empty() {
            return Err(GuidelineValidationError::EmptyRuleId);
        }
        if self.text.trim().is_empty() {
            return Err(GuidelineValidationError::EmptyText {
                rule_id: self.rule_id.clone(),
            });
        }
        Ok(())
    }
}

/// Errors emitted while validating guideline definitions.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuidelineValidationError {
    #[error("guideline rule id must not be blank")]
    EmptyRuleId,
    #[error("guideline `{rule_id}` text must not be empty")]
    EmptyText { rule_id: String },
    #[error("duplicate guideline rule id `{rule_id}`")]
    DuplicateRuleId { rule_id: String },
}

/// Immutable, in-memory catalog of guidelines keyed by rule id.
#[derive(Debug, Clone, Default)]
pub struct GuidelineCatalog {
    entries: BTreeMap<String, GuidelineEntry>,
}

impl GuidelineCatalog {
    /// Build a catalog, rejecting invalid entries and duplicate rule ids.
    pub fn from_entries(
        entries: impl IntoIterator<Item = GuidelineEntry>,
    ) -> Result<Self, GuidelineValidationError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            entry.validate()?;
            if map.contains_key(&entry.rule_id) {
                return Err(GuidelineValidationError::DuplicateRuleId {
                    rule_id: entry.rule_id,
                });
            }
            map.insert(entry.rule_id.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    /// Load every entry from a repository into a catalog.
    pub async fn load<R: GuidelineRepository + ?Sized>(repo: &R) -> AnyResult<Self> {
        let entries = repo.load_guidelines().await?;
        Ok(Self::from_entries(entries)?)
    }

    /// The catalog compiled into the crate.
    pub fn builtin() -> Self {
        catalog::builtin_catalog().clone()
    }

    pub fn get(&self, rule_id: &str) -> Option<&GuidelineEntry> {
        self.entries.get(rule_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in rule-id order.
    pub fn iter(&self) -> impl Iterator<Item = &GuidelineEntry> {
        self.entries.values()
    }
}

/// Abstraction over guideline loading so the built-in pack and user-supplied files can be swapped.
#[async_trait]
pub trait GuidelineRepository: Send + Sync {
    /// Retrieve the full guideline set.
    async fn load_guidelines(&self) -> AnyResult<Vec<GuidelineEntry>>;

    /// Fetch a single guideline by rule id if it exists.
    async fn get_guideline(&self, rule_id: &str) -> AnyResult<Option<GuidelineEntry>> {
        let entries = self.load_guidelines().await?;
        Ok(entries.into_iter().find(|entry| entry.rule_id == rule_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_validation_rejects_blank_text() {
        let err = GuidelineEntry::new("WCAG 1.4.3", "Contrast", "   ")
            .expect_err("blank text should be rejected");
        assert_eq!(
            err,
            GuidelineValidationError::EmptyText {
                rule_id: "WCAG 1.4.3".into()
            }
        );
    }

    #[test]
    fn catalog_rejects_duplicate_rule_ids() {
        let entry = GuidelineEntry::new("WCAG 1.1.1", "Non-text Content", "Provide alt text")
            .unwrap();
        let err = GuidelineCatalog::from_entries(vec![entry.clone(), entry])
            .expect_err("duplicates should be rejected");
        assert!(matches!(
            err,
            GuidelineValidationError::DuplicateRuleId { rule_id } if rule_id == "WCAG 1.1.1"
        ));
    }

    #[test]
    fn builtin_catalog_covers_every_category_rule() {
        let catalog = GuidelineCatalog::builtin();
        assert_eq!(DEFECT_CATEGORIES.len(), 15);
        for category in DEFECT_CATEGORIES {
            for rule_id in category.rule_ids {
                assert!(
                    catalog.get(rule_id).is_some(),
                    "category `{}` references unknown rule {rule_id}",
                    category.title
                );
            }
        }
    }

    #[tokio::test]
    async fn builtin_repository_finds_single_rule() {
        let repo = BuiltinGuidelineRepository;
        let entry = repo
            .get_guideline("WCAG 1.4.3")
            .await
            .unwrap()
            .expect("contrast guideline should exist");
        assert_eq!(entry.title, "Contrast (Minimum)");
    }
}
