use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::knowledge::{GuidelineCatalog, DEFECT_CATEGORIES};
use crate::scanner::ScanTask;

/// Lines of each related file quoted in the dependency block.
pub const RELATED_PREVIEW_LINES: usize = 40;
/// Related files that receive a content preview; the rest are listed by path only.
pub const MAX_RELATED_PREVIEWS: usize = 8;

const ROLE_HEADER: &str = "You are an accessibility auditor reviewing one source asset from an interactive application (UI layouts, scenes, prefabs, scripts, stylesheets). Report concrete accessibility defects present in the file.";

const ANSWER_SCHEMA: &str = r#"Answer with a single JSON array and nothing else. Each element must have exactly this shape:
{"line": <integer line number, 0 if unknown>, "severity": "critical" | "warning" | "info", "description": "<what is wrong>", "recommendation": "<how to fix it>", "wcag_rule": "<rule id, e.g. WCAG 1.4.3>"}
Return [] when the file has no accessibility defects."#;

const GENERIC_GUIDELINES: &str = "No specific guideline signals were detected in this file. Apply the categories above using general WCAG 2.2 level AA success criteria.";

const CROSS_FILE_CHECKS: &[&str] = &[
    "Colors or styles defined in related files still give text and controls sufficient contrast here.",
    "Controls instantiated from related prefabs or layouts expose a name and role through their scripts.",
    "Audio or video triggered by related scripts has captions or a visual equivalent.",
    "Input handled in related scripts has keyboard or controller alternatives to pointer and gesture input.",
    "Timers, animations and flashing effects driven by related files can be paused, extended or reduced.",
];

/// The complete text sent to the model for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub text: String,
    /// Guideline rule ids whose text was embedded, in rule-id order.
    pub rule_ids: Vec<String>,
}

/// A file related to the scanned one, with an optional leading excerpt of its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedFile {
    pub path: PathBuf,
    /// `None` when the content could not be read or no preview slot was left.
    pub preview: Option<String>,
}

impl RelatedFile {
    pub fn listed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            preview: None,
        }
    }

    pub fn with_content(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            preview: Some(preview_lines(content, RELATED_PREVIEW_LINES)),
        }
    }
}

/// Asset families used to group related files in the dependency block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssetKind {
    Script,
    Scene,
    Prefab,
    UiDocument,
    Material,
    Image,
    Audio,
    Animation,
    Other,
}

impl AssetKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "cs" | "js" | "ts" | "tsx" | "jsx" | "lua" | "gd" | "cpp" | "h" | "py" => {
                Self::Script
            }
            "unity" | "scene" | "tscn" | "umap" => Self::Scene,
            "prefab" => Self::Prefab,
            "uxml" | "uss" | "html" | "htm" | "css" | "xaml" | "xml" => Self::UiDocument,
            "mat" | "shader" | "shadergraph" => Self::Material,
            "png" | "jpg" | "jpeg" | "psd" | "tga" | "svg" | "gif" | "webp" => Self::Image,
            "wav" | "mp3" | "ogg" | "aiff" | "mp4" | "webm" | "mov" => Self::Audio,
            "anim" | "controller" | "overridecontroller" | "playable" => Self::Animation,
            _ => Self::Other,
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Self::Script => "Scripts",
            Self::Scene => "Scenes",
            Self::Prefab => "Prefabs",
            Self::UiDocument => "UI documents and stylesheets",
            Self::Material => "Materials and shaders",
            Self::Image => "Images",
            Self::Audio => "Audio and video",
            Self::Animation => "Animations",
            Self::Other => "Other assets",
        }
    }
}

/// Build the prompt for `task`.
///
/// Section order is fixed: instruction header, guideline text, dependency
/// context (only when the task has related paths), then the file content
/// verbatim.
pub fn build(
    task: &ScanTask,
    selected_rules: &BTreeSet<String>,
    catalog: &GuidelineCatalog,
    related: &[RelatedFile],
) -> PromptPayload {
    let mut text = String::with_capacity(task.content.len() + 4096);
    write_header(&mut text);
    let rule_ids = write_guidelines(&mut text, selected_rules, catalog);
    if !task.related_paths.is_empty() {
        write_dependency_context(&mut text, &task.related_paths, related);
    }
    write_file_section(&mut text, task);
    PromptPayload { text, rule_ids }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn write_header(out: &mut String) {
    push_line(out, ROLE_HEADER);
    out.push('\n');
    push_line(out, "Check the file for these defect categories:");
    for (idx, category) in DEFECT_CATEGORIES.iter().enumerate() {
        push_line(
            out,
            &format!(
                "{}. {} ({})",
                idx + 1,
                category.title,
                category.rule_ids.join(", ")
            ),
        );
    }
    out.push('\n');
    push_line(out, ANSWER_SCHEMA);
    out.push('\n');
}

fn write_guidelines(
    out: &mut String,
    selected: &BTreeSet<String>,
    catalog: &GuidelineCatalog,
) -> Vec<String> {
    let entries: Vec<_> = selected
        .iter()
        .filter_map(|rule_id| catalog.get(rule_id))
        .collect();
    out.push_str("## Guidelines\n");
    if entries.is_empty() {
        out.push_str(GENERIC_GUIDELINES);
        out.push_str("\n\n");
        return Vec::new();
    }
    for entry in &entries {
        let line = if entry.title.is_empty() {
            format!("- {}: {}", entry.rule_id, entry.text)
        } else {
            format!("- {} {}: {}", entry.rule_id, entry.title, entry.text)
        };
        push_line(out, &line);
    }
    out.push('\n');
    entries.iter().map(|entry| entry.rule_id.clone()).collect()
}

fn write_dependency_context(out: &mut String, related_paths: &[PathBuf], related: &[RelatedFile]) {
    let previews: BTreeMap<&Path, &str> = related
        .iter()
        .filter_map(|file| file.preview.as_deref().map(|p| (file.path.as_path(), p)))
        .collect();
    let mut groups: BTreeMap<AssetKind, Vec<&PathBuf>> = BTreeMap::new();
    for path in related_paths {
        groups
            .entry(AssetKind::from_path(path))
            .or_default()
            .push(path);
    }

    push_line(out, "## Related files");
    push_line(
        out,
        &format!(
            "This file is connected to {} other asset(s). Use them to judge issues that span files.",
            related_paths.len()
        ),
    );
    for (kind, paths) in groups {
        push_line(out, &format!("### {} ({})", kind.heading(), paths.len()));
        for path in paths {
            push_line(out, &format!("- {}", path.display()));
            if let Some(preview) = previews.get(path.as_path()) {
                push_line(out, "```");
                push_line(out, preview.trim_end());
                push_line(out, "```");
            }
        }
    }
    push_line(out, "### Cross-file checks");
    for check in CROSS_FILE_CHECKS {
        push_line(out, &format!("- {check}"));
    }
    out.push('\n');
}

fn write_file_section(out: &mut String, task: &ScanTask) {
    push_line(out, &format!("## File: {}", task.file_path.display()));
    push_line(out, "```");
    out.push_str(&task.content);
    if !task.content.ends_with('\n') {
        out.push('\n');
    }
    push_line(out, "```");
}

fn preview_lines(content: &str, max_lines: usize) -> String {
    let mut lines = content.lines();
    let mut preview = lines.by_ref().take(max_lines).collect::<Vec<_>>().join("\n");
    if lines.next().is_some() {
        preview.push_str("\n…");
    }
    preview
}
