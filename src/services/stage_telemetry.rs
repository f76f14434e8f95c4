//! Stage-text parsing and presentation helpers for backend progress events.
//!
//! Backend stages arrive as human-readable text such as
//! `"Downloading sodium-0.5.8.jar (3/41)..."`. The helpers here split that into
//! a stable label and the item currently being worked on, and format byte,
//! speed and ETA figures with fixed thresholds so views and tests agree.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DOWNLOADING_LABEL: &str = "Downloading";
const AGGREGATE_SUBJECTS: [&str; 5] = ["libraries", "assets", "client jar", "mods", "modpack"];
const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

static COUNT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\s*\d+\s*/\s*\d+\s*\)\s*$").expect("count suffix pattern"));
static EMBEDDED_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s*(?:/|of)\s*\d+").expect("embedded count pattern"));

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageParts {
    pub stage_label: String,
    pub current_item: String,
}

fn strip_decorations(raw: &str) -> &str {
    let mut text = raw.trim();
    loop {
        let before = text.len();
        if let Some(rest) = text.strip_suffix("...") {
            text = rest.trim_end();
        } else if let Some(rest) = text.strip_suffix('…') {
            text = rest.trim_end();
        } else if let Some(found) = COUNT_SUFFIX.find(text) {
            text = text[..found.start()].trim_end();
        }
        if text.len() == before {
            return text;
        }
    }
}

fn is_aggregate_subject(subject: &str) -> bool {
    let lowered = subject.to_ascii_lowercase();
    AGGREGATE_SUBJECTS.iter().any(|noun| {
        lowered == *noun
            || lowered
                .strip_prefix(noun)
                .map(|rest| rest.starts_with(' '))
                .unwrap_or(false)
    })
}

fn strip_downloading_prefix(text: &str) -> Option<&str> {
    let prefix_len = DOWNLOADING_LABEL.len();
    let head = text.get(..prefix_len)?;
    if !head.eq_ignore_ascii_case(DOWNLOADING_LABEL) {
        return None;
    }
    let rest = &text[prefix_len..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

/// Splits raw stage text into a label and the current item.
///
/// Unrecognised text comes back untouched as the label with an empty item.
pub fn split_stage(raw: &str) -> StageParts {
    let original = raw.trim();
    let cleaned = strip_decorations(original);

    if let Some((label, item)) = cleaned.split_once(':') {
        let label = label.trim();
        let item = item.trim();
        if !label.is_empty() && !item.is_empty() {
            return StageParts {
                stage_label: label.to_string(),
                current_item: item.to_string(),
            };
        }
    }

    if let Some(subject) = strip_downloading_prefix(cleaned) {
        if !subject.is_empty() && !is_aggregate_subject(subject) && !EMBEDDED_COUNT.is_match(subject) {
            return StageParts {
                stage_label: DOWNLOADING_LABEL.to_string(),
                current_item: subject.to_string(),
            };
        }
    }

    StageParts {
        stage_label: original.to_string(),
        current_item: String::new(),
    }
}

/// Clamps to `[0, 100]`; NaN and infinities become 0.
pub fn clamp_progress(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

pub fn clamp_progress_opt(value: Option<f64>) -> f64 {
    value.map(clamp_progress).unwrap_or(0.0)
}

/// Binary units. Plain bytes print as integers; scaled values keep one
/// decimal below 10 and none from 10 upward.
pub fn format_bytes(bytes: f64) -> String {
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0 B".to_string();
    }
    if bytes < 1024.0 {
        return format!("{} B", bytes.round() as u64);
    }

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value >= 10.0 {
        format!("{:.0} {}", value, BYTE_UNITS[unit])
    } else {
        format!("{:.1} {}", value, BYTE_UNITS[unit])
    }
}

pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--".to_string();
    }
    let total = seconds.ceil() as u64;
    if total < 60 {
        return format!("{total}s");
    }
    if total < 3600 {
        return format!("{}m {}s", total / 60, total % 60);
    }
    format!("{}h {}m", total / 3600, (total % 3600) / 60)
}

/// Seconds remaining at `speed_bps`, when that is meaningful.
pub fn eta_seconds(downloaded: u64, total: u64, speed_bps: f64) -> Option<f64> {
    if !speed_bps.is_finite() || speed_bps <= 0.0 || total == 0 || downloaded > total {
        return None;
    }
    Some((total - downloaded) as f64 / speed_bps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parts(label: &str, item: &str) -> StageParts {
        StageParts {
            stage_label: label.to_string(),
            current_item: item.to_string(),
        }
    }

    #[test]
    fn colon_form_splits_on_first_colon() {
        assert_eq!(
            split_stage("Installing mod: sodium-0.5.8.jar (3/41)..."),
            parts("Installing mod", "sodium-0.5.8.jar")
        );
        assert_eq!(split_stage("Verifying: a:b"), parts("Verifying", "a:b"));
    }

    #[test]
    fn downloading_single_subject_becomes_item() {
        assert_eq!(
            split_stage("Downloading fabric-api-0.92.jar..."),
            parts("Downloading", "fabric-api-0.92.jar")
        );
        assert_eq!(split_stage("downloading Iris Shaders…"), parts("Downloading", "Iris Shaders"));
    }

    #[test]
    fn aggregate_and_counted_subjects_are_left_alone() {
        assert_eq!(
            split_stage("Downloading libraries"),
            parts("Downloading libraries", "")
        );
        assert_eq!(split_stage("Downloading client jar..."), parts("Downloading client jar...", ""));
        assert_eq!(split_stage("Downloading mods (2/9)"), parts("Downloading mods (2/9)", ""));
        assert_eq!(split_stage("Downloading 3 of 12 files"), parts("Downloading 3 of 12 files", ""));
        assert_eq!(split_stage("  Preparing launch  "), parts("Preparing launch", ""));
        assert_eq!(split_stage(""), parts("", ""));
    }

    #[test]
    fn modpack_prefix_does_not_swallow_similar_names() {
        assert_eq!(split_stage("Downloading modmenu.jar"), parts("Downloading", "modmenu.jar"));
        assert_eq!(split_stage("Downloading modpack files"), parts("Downloading modpack files", ""));
    }

    #[test]
    fn clamp_handles_non_finite_and_bounds() {
        assert_eq!(clamp_progress(f64::NAN), 0.0);
        assert_eq!(clamp_progress(f64::INFINITY), 0.0);
        assert_eq!(clamp_progress(-4.0), 0.0);
        assert_eq!(clamp_progress(250.0), 100.0);
        assert_eq!(clamp_progress(42.5), 42.5);
        assert_eq!(clamp_progress_opt(None), 0.0);
    }

    #[test]
    fn byte_formatting_thresholds() {
        assert_eq!(format_bytes(0.0), "0 B");
        assert_eq!(format_bytes(f64::NAN), "0 B");
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(10.0 * 1024.0), "10 KB");
        assert_eq!(format_bytes(5.3 * 1024.0 * 1024.0), "5.3 MB");
        assert_eq!(format_bytes(300.0 * 1024.0 * 1024.0 * 1024.0), "300 GB");
        assert_eq!(format_speed(2048.0), "2.0 KB/s");
        assert_eq!(format_speed(0.0), "0 B/s");
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(f64::NAN), "--");
        assert_eq!(format_eta(-1.0), "--");
        assert_eq!(format_eta(42.2), "43s");
        assert_eq!(format_eta(125.0), "2m 5s");
        assert_eq!(format_eta(3.0 * 3600.0 + 120.0), "3h 2m");
        assert_eq!(eta_seconds(50, 150, 10.0), Some(10.0));
        assert_eq!(eta_seconds(50, 150, 0.0), None);
        assert_eq!(eta_seconds(200, 150, 10.0), None);
    }

    proptest! {
        #[test]
        fn clamp_is_idempotent(value in proptest::num::f64::ANY) {
            let once = clamp_progress(value);
            prop_assert_eq!(clamp_progress(once), once);
            prop_assert!((0.0..=100.0).contains(&once));
        }
    }
}
