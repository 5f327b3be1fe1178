//! Interpretation of training-script output.
//!
//! Each line is tried first as a `PROGRESS: {json}` report, then against a
//! small set of free-text patterns. The result records which path matched.

use crate::metrics::{normalize_accuracy, TrainingMetricSnapshot, STATUS_TAG_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of a structured progress report.
pub const PROGRESS_PREFIX: &str = "PROGRESS:";

/// Keys of the progress object that map onto snapshot fields.
const KNOWN_KEYS: &[&str] = &[
    "epoch",
    "total_epochs",
    "train_loss",
    "val_loss",
    "test_loss",
    "loss",
    "train_accuracy",
    "val_accuracy",
    "test_accuracy",
    "accuracy",
];

/// `Epoch 2/10`, `Epoch 2 / 10` or `Epoch 2:10`. A colon must be followed
/// directly by the total so `Epoch 0: 100%` is not read as 0 of 100.
static EPOCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bepoch\s+(\d+)\s*(?:/\s*|:)(\d+)").expect("epoch pattern is valid"));

static LOSS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(train|training|val|validation|test)[\s_]*)?loss\s*[:=]?\s*([0-9]+(?:\.[0-9]+)?(?:e[-+]?[0-9]+)?)")
        .expect("loss pattern is valid")
});

static ACCURACY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(train|training|val|validation|test)[\s_]*)?acc(?:uracy)?\s*[:=]?\s*([0-9]+(?:\.[0-9]+)?)\s*%?")
        .expect("accuracy pattern is valid")
});

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Stderr)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Outcome of interpreting one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A well-formed `PROGRESS:` report.
    Structured(TrainingMetricSnapshot),
    /// Metrics recovered from free text.
    Legacy(TrainingMetricSnapshot),
    Unparsed,
}

impl ParsedLine {
    #[must_use]
    pub fn snapshot(&self) -> Option<&TrainingMetricSnapshot> {
        match self {
            Self::Structured(snap) | Self::Legacy(snap) => Some(snap),
            Self::Unparsed => None,
        }
    }

    #[must_use]
    pub fn into_snapshot(self) -> Option<TrainingMetricSnapshot> {
        match self {
            Self::Structured(snap) | Self::Legacy(snap) => Some(snap),
            Self::Unparsed => None,
        }
    }
}

/// Interprets one line of script output. Never fails; unknown text is `Unparsed`.
#[must_use]
pub fn parse_line(line: &str) -> ParsedLine {
    if let Some(snapshot) = parse_structured(line) {
        return ParsedLine::Structured(snapshot);
    }
    if let Some(snapshot) = parse_legacy(line) {
        return ParsedLine::Legacy(snapshot);
    }
    ParsedLine::Unparsed
}

/// Parses a `PROGRESS: {...}` line.
#[must_use]
pub fn parse_structured(line: &str) -> Option<TrainingMetricSnapshot> {
    let payload = line.trim_start().strip_prefix(PROGRESS_PREFIX)?.trim();
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(payload) else {
        return None;
    };

    let mut snap = TrainingMetricSnapshot {
        epoch: count(&data, "epoch").unwrap_or_default(),
        total_epochs: count(&data, "total_epochs").unwrap_or_default(),
        train_loss: number(&data, "train_loss").or_else(|| number(&data, "loss")),
        val_loss: number(&data, "val_loss"),
        test_loss: number(&data, "test_loss"),
        train_accuracy: number(&data, "train_accuracy").map(normalize_accuracy),
        val_accuracy: number(&data, "val_accuracy").map(normalize_accuracy),
        test_accuracy: number(&data, "test_accuracy").map(normalize_accuracy),
        ..Default::default()
    };

    if let Some(acc) = number(&data, "accuracy").map(normalize_accuracy) {
        assign_generic_accuracy(&mut snap, acc);
    }

    for (key, value) in &data {
        if KNOWN_KEYS.contains(&key.as_str()) {
            continue;
        }
        if key == STATUS_TAG_KEY {
            if let Some(tag) = value.as_str() {
                snap.custom.insert(STATUS_TAG_KEY.to_string(), Value::String(tag.to_string()));
            }
        } else if !value.is_object() && !value.is_array() && !value.is_null() {
            snap.custom.insert(key.clone(), value.clone());
        }
    }

    snap.has_data().then_some(snap)
}

/// An unlabeled accuracy fills the test slot, then the train slot, and
/// otherwise overwrites the test slot.
fn assign_generic_accuracy(snap: &mut TrainingMetricSnapshot, acc: f64) {
    if snap.test_accuracy.is_none() {
        snap.test_accuracy = Some(acc);
    } else if snap.train_accuracy.is_none() {
        snap.train_accuracy = Some(acc);
    } else {
        snap.test_accuracy = Some(acc);
    }
}

fn number(data: &Map<String, Value>, key: &str) -> Option<f64> {
    data.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn count(data: &Map<String, Value>, key: &str) -> Option<u32> {
    number(data, key).filter(|v| *v >= 0.0).map(|v| v.min(f64::from(u32::MAX)) as u32)
}

/// Recovers metrics from free-form log text such as
/// `Epoch 2/10 - loss: 0.41 - val_loss: 0.47 - acc: 88.1%`.
#[must_use]
pub fn parse_legacy(line: &str) -> Option<TrainingMetricSnapshot> {
    let mut snap = TrainingMetricSnapshot::default();

    let epoch = EPOCH_RE
        .captures_iter(line)
        .find(|caps| caps.get(0).is_some_and(|m| !line[m.end()..].starts_with('%')));
    if let Some(caps) = epoch {
        snap.epoch = caps[1].parse().unwrap_or_default();
        snap.total_epochs = caps[2].parse().unwrap_or_default();
    }

    for caps in LOSS_RE.captures_iter(line) {
        let Ok(value) = caps[2].parse::<f64>() else { continue };
        let slot = match qualifier(caps.get(1).map(|m| m.as_str())) {
            Qualifier::Train => &mut snap.train_loss,
            Qualifier::Validation => &mut snap.val_loss,
            Qualifier::Test => &mut snap.test_loss,
        };
        slot.get_or_insert(value);
    }

    for caps in ACCURACY_RE.captures_iter(line) {
        let Ok(value) = caps[2].parse::<f64>() else { continue };
        let slot = match qualifier(caps.get(1).map(|m| m.as_str())) {
            Qualifier::Train => &mut snap.train_accuracy,
            Qualifier::Validation => &mut snap.val_accuracy,
            Qualifier::Test => &mut snap.test_accuracy,
        };
        slot.get_or_insert(normalize_accuracy(value));
    }

    snap.has_data().then_some(snap)
}

enum Qualifier {
    Train,
    Validation,
    Test,
}

fn qualifier(word: Option<&str>) -> Qualifier {
    match word.map(str::to_ascii_lowercase).as_deref() {
        Some("val" | "validation") => Qualifier::Validation,
        Some("test") => Qualifier::Test,
        _ => Qualifier::Train,
    }
}
