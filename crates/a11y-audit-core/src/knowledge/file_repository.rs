use std::{collections::HashSet, fs, path::PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;

use super::{GuidelineEntry, GuidelineRepository};

/// Loads guidelines from `guidelines.txt` (`rule_id|title|text` lines) and
/// `guidelines.json` (array of entries) located under a base directory.
pub struct FileGuidelineRepository {
    base_path: PathBuf,
    cache: OnceCell<Vec<GuidelineEntry>>,
}

impl FileGuidelineRepository {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: OnceCell::new(),
        }
    }

    fn text_path(&self) -> PathBuf {
        self.base_path.join("guidelines.txt")
    }

    fn json_path(&self) -> PathBuf {
        self.base_path.join("guidelines.json")
    }

    fn load_text(&self, seen: &mut HashSet<String>) -> Result<Vec<GuidelineEntry>> {
        let mut entries = Vec::new();
        let path = self.text_path();
        if !path.exists() {
            return Ok(entries);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read guideline file at {}", path.display()))?;
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parts: Vec<_> = trimmed.splitn(3, '|').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(anyhow::anyhow!(
                    "invalid guideline format at {}:{} (expected rule_id|title|text)",
                    path.display(),
                    idx + 1
                ));
            }
            let rule_id = parts[0].to_string();
            if !seen.insert(rule_id.clone()) {
                return Err(anyhow::anyhow!("duplicate guideline rule id `{rule_id}`"));
            }
            let entry = GuidelineEntry::new(rule_id, parts[1], parts[2]).with_context(|| {
                format!("invalid guideline at {}:{}", path.display(), idx + 1)
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn load_json(&self, seen: &mut HashSet<String>) -> Result<Vec<GuidelineEntry>> {
        let path = self.json_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read guideline file at {}", path.display()))?;
        let items: Vec<GuidelineEntry> = serde_json::from_str(&raw).with_context(|| {
            format!(
                "invalid JSON structure in guideline file at {}",
                path.display()
            )
        })?;
        for item in &items {
            if !seen.insert(item.rule_id.clone()) {
                return Err(anyhow::anyhow!(
                    "duplicate guideline rule id `{}`",
                    item.rule_id
                ));
            }
            item.validate()?;
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl GuidelineRepository for FileGuidelineRepository {
    async fn load_guidelines(&self) -> Result<Vec<GuidelineEntry>> {
        let entries = self.cache.get_or_try_init(|| {
            let mut seen = HashSet::new();
            let mut entries = self.load_text(&mut seen)?;
            entries.extend(self.load_json(&mut seen)?);
            Ok::<_, anyhow::Error>(entries)
        })?;
        Ok(entries.clone())
    }
}
