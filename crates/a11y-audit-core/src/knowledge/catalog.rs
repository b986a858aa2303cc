use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;

use super::{GuidelineCatalog, GuidelineEntry, GuidelineRepository};

/// One of the defect categories enumerated in the instruction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefectCategory {
    pub title: &'static str,
    pub rule_ids: &'static [&'static str],
}

pub const DEFECT_CATEGORIES: &[DefectCategory] = &[
    DefectCategory {
        title: "Insufficient text or UI contrast",
        rule_ids: &["WCAG 1.4.3", "WCAG 1.4.11"],
    },
    DefectCategory {
        title: "Information conveyed by color alone",
        rule_ids: &["WCAG 1.4.1"],
    },
    DefectCategory {
        title: "Missing captions or transcripts for audio/video",
        rule_ids: &["WCAG 1.2.1", "WCAG 1.2.2"],
    },
    DefectCategory {
        title: "Audio that plays without a way to pause or mute",
        rule_ids: &["WCAG 1.4.2"],
    },
    DefectCategory {
        title: "Time limits that cannot be extended or disabled",
        rule_ids: &["WCAG 2.2.1"],
    },
    DefectCategory {
        title: "Moving or auto-updating content without pause",
        rule_ids: &["WCAG 2.2.2"],
    },
    DefectCategory {
        title: "Flashing content above safe thresholds",
        rule_ids: &["WCAG 2.3.1"],
    },
    DefectCategory {
        title: "Motion and animation without a reduce-motion option",
        rule_ids: &["WCAG 2.3.3"],
    },
    DefectCategory {
        title: "Functionality unreachable by keyboard or controller",
        rule_ids: &["WCAG 2.1.1", "WCAG 2.1.2"],
    },
    DefectCategory {
        title: "Illogical focus order or invisible focus indicator",
        rule_ids: &["WCAG 2.4.3", "WCAG 2.4.7"],
    },
    DefectCategory {
        title: "Images and icons without text alternatives",
        rule_ids: &["WCAG 1.1.1"],
    },
    DefectCategory {
        title: "Status and error feedback not exposed to assistive tech",
        rule_ids: &["WCAG 4.1.3", "WCAG 3.3.1"],
    },
    DefectCategory {
        title: "Text that cannot be resized, respaced or reoriented",
        rule_ids: &["WCAG 1.4.4", "WCAG 1.4.12", "WCAG 1.3.4"],
    },
    DefectCategory {
        title: "Complex gestures or device motion as the only input",
        rule_ids: &["WCAG 2.5.1", "WCAG 2.5.2", "WCAG 2.5.4"],
    },
    DefectCategory {
        title: "Small touch targets or controls without name and role",
        rule_ids: &["WCAG 2.5.5", "WCAG 4.1.2"],
    },
];

const BUILTIN_GUIDELINES: &[(&str, &str, &str)] = &[
    (
        "WCAG 1.1.1",
        "Non-text Content",
        "All non-text content (images, icons, sprites, image buttons) needs a text alternative that serves the same purpose. Decorative images must be hidden from assistive technology.",
    ),
    (
        "WCAG 1.2.1",
        "Audio-only and Video-only (Prerecorded)",
        "Prerecorded audio-only content needs a transcript; prerecorded video-only content needs a transcript or audio description.",
    ),
    (
        "WCAG 1.2.2",
        "Captions (Prerecorded)",
        "Synchronized captions are provided for all prerecorded audio in media, including cutscenes and voiced dialogue.",
    ),
    (
        "WCAG 1.3.4",
        "Orientation",
        "Content does not restrict its view and operation to a single display orientation unless that orientation is essential.",
    ),
    (
        "WCAG 1.4.1",
        "Use of Color",
        "Color is not used as the only visual means of conveying information, indicating an action, prompting a response, or distinguishing an element.",
    ),
    (
        "WCAG 1.4.2",
        "Audio Control",
        "Audio that plays automatically for more than 3 seconds can be paused or stopped, or its volume controlled independently of the system volume.",
    ),
    (
        "WCAG 1.4.3",
        "Contrast (Minimum)",
        "Text and images of text have a contrast ratio of at least 4.5:1, or 3:1 for large text (18pt, or 14pt bold).",
    ),
    (
        "WCAG 1.4.4",
        "Resize Text",
        "Text can be resized up to 200 percent without loss of content or functionality; avoid fixed pixel font sizes and clipping containers.",
    ),
    (
        "WCAG 1.4.11",
        "Non-text Contrast",
        "UI components, focus indicators and meaningful graphics have a contrast ratio of at least 3:1 against adjacent colors.",
    ),
    (
        "WCAG 1.4.12",
        "Text Spacing",
        "No loss of content occurs when line height, paragraph, letter and word spacing are increased.",
    ),
    (
        "WCAG 2.1.1",
        "Keyboard",
        "All functionality is operable through a keyboard or controller interface without requiring specific timings for individual keystrokes.",
    ),
    (
        "WCAG 2.1.2",
        "No Keyboard Trap",
        "If focus can be moved to a component using the keyboard, focus can be moved away from it using only the keyboard.",
    ),
    (
        "WCAG 2.2.1",
        "Timing Adjustable",
        "For each time limit the user can turn it off, adjust it to at least ten times the default, or extend it with a simple action.",
    ),
    (
        "WCAG 2.2.2",
        "Pause, Stop, Hide",
        "Moving, blinking, scrolling or auto-updating content that starts automatically and lasts more than 5 seconds can be paused, stopped or hidden.",
    ),
    (
        "WCAG 2.3.1",
        "Three Flashes or Below Threshold",
        "Content does not flash more than three times in any one-second period, nor exceed the general and red flash thresholds.",
    ),
    (
        "WCAG 2.3.3",
        "Animation from Interactions",
        "Motion animation triggered by interaction can be disabled unless essential; honour a reduced-motion preference for camera shake, parallax and zoom.",
    ),
    (
        "WCAG 2.4.3",
        "Focus Order",
        "Focusable components receive focus in an order that preserves meaning and operability.",
    ),
    (
        "WCAG 2.4.7",
        "Focus Visible",
        "Any keyboard- or controller-operable interface has a mode where the focus indicator is visible.",
    ),
    (
        "WCAG 2.5.1",
        "Pointer Gestures",
        "Functionality that uses multipoint or path-based gestures can be operated with a single pointer without a path-based gesture.",
    ),
    (
        "WCAG 2.5.2",
        "Pointer Cancellation",
        "Single-pointer functions do not complete on the down-event, or can be aborted or undone.",
    ),
    (
        "WCAG 2.5.4",
        "Motion Actuation",
        "Functionality operated by device motion (shake, tilt) can also be operated by UI components, and motion response can be disabled.",
    ),
    (
        "WCAG 2.5.5",
        "Target Size",
        "Pointer targets are at least 44 by 44 CSS pixels (or equivalent points) unless an equivalent larger target exists.",
    ),
    (
        "WCAG 3.3.1",
        "Error Identification",
        "Input errors are automatically detected, the item in error is identified, and the error is described to the user in text.",
    ),
    (
        "WCAG 4.1.2",
        "Name, Role, Value",
        "Every UI component exposes a name and role to assistive technology, and its states and values are programmatically settable and announced on change.",
    ),
    (
        "WCAG 4.1.3",
        "Status Messages",
        "Status messages (toasts, notifications, score updates) can be announced by assistive technology without receiving focus.",
    ),
];

static BUILTIN: Lazy<GuidelineCatalog> = Lazy::new(|| {
    let entries = BUILTIN_GUIDELINES
        .iter()
        .map(|(rule_id, title, text)| GuidelineEntry {
            rule_id: (*rule_id).to_string(),
            title: (*title).to_string(),
            text: (*text).to_string(),
        })
        .collect::<Vec<_>>();
    GuidelineCatalog::from_entries(entries).unwrap_or_default()
});

pub(super) fn builtin_catalog() -> &'static GuidelineCatalog {
    &BUILTIN
}

/// Serves the guideline pack compiled into the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinGuidelineRepository;

#[async_trait]
impl GuidelineRepository for BuiltinGuidelineRepository {
    async fn load_guidelines(&self) -> Result<Vec<GuidelineEntry>> {
        Ok(builtin_catalog().iter().cloned().collect())
    }
}
