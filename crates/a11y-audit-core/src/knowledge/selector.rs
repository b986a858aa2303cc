use std::collections::BTreeSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result};
use tracing::{instrument, trace};

/// Lexical signal families recognised in asset content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalCategory {
    Color,
    AudioVideo,
    Timing,
    Animation,
    UiFocus,
    Image,
    Feedback,
    TextScaling,
    InputDevice,
    Gesture,
}

struct Vocabulary {
    category: SignalCategory,
    markers: &'static [&'static str],
    rule_ids: &'static [&'static str],
}

const VOCABULARIES: &[Vocabulary] = &[
    Vocabulary {
        category: SignalCategory::Color,
        markers: &["color", "colour", "contrast", "rgba", "tint", "palette", "hue"],
        rule_ids: &["WCAG 1.4.3", "WCAG 1.4.11", "WCAG 1.4.1"],
    },
    Vocabulary {
        category: SignalCategory::AudioVideo,
        markers: &[
            "audio", "sound", "video", "voice", "music", "subtitle", "caption", "dialogue",
        ],
        rule_ids: &["WCAG 1.2.1", "WCAG 1.2.2", "WCAG 1.4.2"],
    },
    Vocabulary {
        category: SignalCategory::Timing,
        markers: &[
            "timer",
            "countdown",
            "timeout",
            "time limit",
            "waitforseconds",
            "deltatime",
            "settimeout",
        ],
        rule_ids: &["WCAG 2.2.1", "WCAG 2.2.2"],
    },
    Vocabulary {
        category: SignalCategory::Animation,
        markers: &[
            "animation", "animator", "tween", "flash", "blink", "parallax", "camera shake", "strobe",
        ],
        rule_ids: &["WCAG 2.3.1", "WCAG 2.3.3", "WCAG 2.2.2"],
    },
    Vocabulary {
        category: SignalCategory::UiFocus,
        markers: &[
            "button",
            "focus",
            "selectable",
            "navigation",
            "eventsystem",
            "toggle",
            "slider",
            "dropdown",
            "menu",
        ],
        rule_ids: &[
            "WCAG 2.4.3",
            "WCAG 2.4.7",
            "WCAG 2.1.1",
            "WCAG 4.1.2",
            "WCAG 2.5.5",
        ],
    },
    Vocabulary {
        category: SignalCategory::Image,
        markers: &["image", "sprite", "texture", "icon", "<img", "picture"],
        rule_ids: &["WCAG 1.1.1"],
    },
    Vocabulary {
        category: SignalCategory::Feedback,
        markers: &[
            "error", "warning", "notification", "toast", "feedback", "status", "alert", "popup",
        ],
        rule_ids: &["WCAG 4.1.3", "WCAG 3.3.1"],
    },
    Vocabulary {
        category: SignalCategory::TextScaling,
        markers: &[
            "font", "fontsize", "textmesh", "text size", "line-height", "letter-spacing", "orientation",
        ],
        rule_ids: &["WCAG 1.4.4", "WCAG 1.4.12", "WCAG 1.3.4"],
    },
    Vocabulary {
        category: SignalCategory::InputDevice,
        markers: &[
            "keycode", "keyboard", "mouse", "gamepad", "controller", "getkey", "keydown", "input.get",
        ],
        rule_ids: &["WCAG 2.1.1", "WCAG 2.1.2"],
    },
    Vocabulary {
        category: SignalCategory::Gesture,
        markers: &[
            "swipe",
            "pinch",
            "drag",
            "gesture",
            "multitouch",
            "touchcount",
            "accelerometer",
            "gyro",
        ],
        rule_ids: &["WCAG 2.5.1", "WCAG 2.5.2", "WCAG 2.5.4"],
    },
];

/// Maps lexical markers in file content to the guideline rule ids worth sending along.
///
/// Matching is a case-insensitive substring search over fixed vocabularies, so the
/// result depends on nothing but the content.
pub struct KnowledgeSelector {
    automaton: AhoCorasick,
    /// Category owning each automaton pattern, indexed by pattern id.
    pattern_categories: Vec<usize>,
}

impl KnowledgeSelector {
    pub fn new() -> Result<Self> {
        let mut patterns = Vec::new();
        let mut pattern_categories = Vec::new();
        for (idx, vocabulary) in VOCABULARIES.iter().enumerate() {
            for marker in vocabulary.markers {
                patterns.push(*marker);
                pattern_categories.push(idx);
            }
        }
        let automaton = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(patterns)
            .context("failed to build guideline marker automaton")?;
        Ok(Self {
            automaton,
            pattern_categories,
        })
    }

    /// Categories whose markers occur anywhere in `content`.
    pub fn categories(&self, content: &str) -> BTreeSet<SignalCategory> {
        let mut hits = vec![false; VOCABULARIES.len()];
        for mat in self.automaton.find_overlapping_iter(content) {
            if let Some(&idx) = self.pattern_categories.get(mat.pattern().as_usize()) {
                hits[idx] = true;
            }
        }
        VOCABULARIES
            .iter()
            .zip(hits)
            .filter(|(_, hit)| *hit)
            .map(|(vocabulary, _)| vocabulary.category)
            .collect()
    }

    /// Rule ids relevant to `content`. Empty content (or content without markers) yields an empty set.
    #[instrument(
        name = "select_guidelines",
        skip(self, content),
        fields(file = %file_name, content_len = content.len())
    )]
    pub fn select(&self, content: &str, file_name: &str) -> BTreeSet<String> {
        let categories = self.categories(content);
        let rules: BTreeSet<String> = VOCABULARIES
            .iter()
            .filter(|vocabulary| categories.contains(&vocabulary.category))
            .flat_map(|vocabulary| vocabulary.rule_ids.iter().map(|id| (*id).to_string()))
            .collect();
        trace!(categories = ?categories, rules = rules.len(), "guidelines selected");
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::GuidelineCatalog;

    #[test]
    fn empty_content_selects_nothing() {
        let selector = KnowledgeSelector::new().unwrap();
        assert!(selector.select("", "Empty.cs").is_empty());
        assert!(selector.select("int x = 1;", "Plain.cs").is_empty());
    }

    #[test]
    fn matches_are_case_insensitive_substrings() {
        let selector = KnowledgeSelector::new().unwrap();
        let rules = selector.select("button.GetComponent<Image>().COLOR = Color.grey;", "Hud.cs");
        assert!(rules.contains("WCAG 1.4.3"));
        assert!(rules.contains("WCAG 1.1.1"));
        assert!(rules.contains("WCAG 2.4.7"));
        assert!(!rules.contains("WCAG 2.5.1"));
    }

    #[test]
    fn unions_rules_across_categories() {
        let selector = KnowledgeSelector::new().unwrap();
        let categories =
            selector.categories("StartCoroutine(Countdown()); if (Input.touchCount > 1) Pinch();");
        assert_eq!(
            categories.into_iter().collect::<Vec<_>>(),
            vec![SignalCategory::Timing, SignalCategory::Gesture]
        );
    }

    #[test]
    fn overlapping_markers_register_both_categories() {
        let selector = KnowledgeSelector::new().unwrap();
        // substring semantics: "flashlight" still counts as flash
        let categories = selector.categories("TextMeshPro flashlight");
        assert!(categories.contains(&SignalCategory::TextScaling));
        assert!(categories.contains(&SignalCategory::Animation));
    }

    #[test]
    fn selection_is_deterministic() {
        let selector = KnowledgeSelector::new().unwrap();
        let content = "audio caption timer swipe";
        assert_eq!(selector.select(content, "a"), selector.select(content, "b"));
    }

    #[test]
    fn every_selected_rule_exists_in_builtin_catalog() {
        let catalog = GuidelineCatalog::builtin();
        for vocabulary in VOCABULARIES {
            for rule_id in vocabulary.rule_ids {
                assert!(catalog.get(rule_id).is_some(), "missing {rule_id}");
            }
        }
    }
}
