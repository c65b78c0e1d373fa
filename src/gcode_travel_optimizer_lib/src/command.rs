use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::geometry::{Axis, Position};
use crate::Mm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCode {
    // G0
    Rapid,
    // G1
    Linear,
    // G2
    ArcClockwise,
    // G3
    ArcCounterClockwise,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Positioning {
    #[default]
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeScope {
    // G90 / G91, which also carry the extruder along
    AllAxes,
    // M82 / M83
    Extruder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Motion(MotionCode),
    SetPositioning { scope: ModeScope, mode: Positioning },
    // G92
    OriginReset,
    // G28
    Home,
    // Anything else, passed through untouched. No code means a blank or comment-only line.
    Other { code: Option<String> },
}

/// A structural role label from a `TYPE:`/`FEATURE:` comment. Equality, hashing and ordering go
/// through the normalized key (upper case, single spaces), the label is kept as written.
#[derive(Debug, Clone)]
pub struct FeatureTag {
    label: String,
    key: String,
}

impl FeatureTag {
    pub fn new(label: &str) -> FeatureTag {
        FeatureTag { label: label.trim().to_owned(), key: normalize_tag(label) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

pub fn normalize_tag(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

impl PartialEq for FeatureTag {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FeatureTag {}

impl Hash for FeatureTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for FeatureTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// A parameter word the decoder could not use, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedWord {
    pub letter: char,
    pub raw: String,
}

/// Machine state on one side of a command.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Position,
    // logical E, as the firmware would report it after any G92
    pub extruder: Mm,
    // modal feed rate
    pub feed_rate: Option<Mm>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    // keys unique; a repeated letter keeps the last value
    pub params: BTreeMap<char, Mm>,
    pub rejected: Vec<RejectedWord>,
    pub before: Snapshot,
    pub after: Snapshot,
    pub feature_tag: Option<FeatureTag>,
    // this line itself carried a TYPE:/FEATURE: comment
    pub tag_marker: bool,
    pub layer_marker: bool,
    // None for commands synthesized during regeneration
    pub line_number: Option<usize>,
    pub text: String,
    pub is_depositing: bool,
    pub positioning: Positioning,
    pub extruder_positioning: Positioning,
}

impl Command {
    pub fn is_motion(&self) -> bool {
        matches!(self.kind, CommandKind::Motion(_))
    }

    pub fn param(&self, letter: char) -> Option<Mm> {
        self.params.get(&letter).copied()
    }

    pub fn has_param(&self, letter: char) -> bool {
        self.params.contains_key(&letter)
    }

    pub fn names_axis(&self, axis: Axis) -> bool {
        self.has_param(axis.letter())
    }

    /// Blank or comment-only line.
    pub fn is_comment_only(&self) -> bool {
        matches!(self.kind, CommandKind::Other { code: None }) && self.params.is_empty() && self.rejected.is_empty()
    }

    pub fn feed_rate(&self) -> Option<Mm> {
        self.param('F')
    }

    pub fn tag_key(&self) -> Option<&str> {
        self.feature_tag.as_ref().map(FeatureTag::key)
    }

    /// True for commands whose effect depends on where the machine already is in a way a
    /// synthesized absolute travel cannot account for.
    pub fn is_order_sensitive(&self) -> bool {
        if self.positioning == Positioning::Relative && self.is_motion() {
            return true;
        }
        match self.kind {
            CommandKind::SetPositioning { .. } | CommandKind::Home => true,
            CommandKind::OriginReset => {
                self.params.is_empty() || Axis::ALL.iter().any(|&axis| self.names_axis(axis))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_compare_by_normalized_key() {
        let a = FeatureTag::new("  External   perimeter ");
        let b = FeatureTag::new("EXTERNAL PERIMETER");
        assert_eq!(a, b);
        assert_eq!(a.key(), "EXTERNAL PERIMETER");
        assert_eq!(a.label(), "External   perimeter");
        assert!(FeatureTag::new("fill") < FeatureTag::new("Skirt"));
    }
}
