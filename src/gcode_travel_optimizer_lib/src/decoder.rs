//! Stateful decoding of gcode lines into [`Command`]s.
//!
//! All machine state lives in an explicit [`MachineState`] that the caller owns and threads
//! through each [`Decoder::decode`] call, so independent documents can be decoded in parallel.

use std::collections::BTreeMap;

use tracing::warn;

use crate::command::{Command, CommandKind, FeatureTag, ModeScope, MotionCode, Positioning, RejectedWord, Snapshot};
use crate::diagnostic::Diagnostic;
use crate::geometry::{Axis, Position};
use crate::tokenizer::{tokenize_line, CodeWord, CommentMarker, ParamWord};
use crate::Mm;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MachineState {
    pub position: Position,
    pub extruder: Mm,
    // E value a move has to exceed to count as depositing
    pub deposit_baseline: Mm,
    pub positioning: Positioning,
    pub extruder_positioning: Positioning,
    pub feed_rate: Option<Mm>,
    pub feature_tag: Option<FeatureTag>,
}

impl MachineState {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot { position: self.position, extruder: self.extruder, feed_rate: self.feed_rate }
    }

    /// Applies one command's effect and returns whether it deposits material.
    ///
    /// `malformed` lists letters whose value could not be parsed; for an axis that means the
    /// firmware's resulting position is unknown to us.
    pub fn apply(
        &mut self,
        kind: &CommandKind,
        params: &BTreeMap<char, Mm>,
        malformed: &[char],
        deposit_epsilon: Mm,
    ) -> bool {
        match kind {
            CommandKind::Motion(_) => return self.apply_motion(params, malformed, deposit_epsilon),
            CommandKind::SetPositioning { scope, mode } => {
                if *scope == ModeScope::AllAxes {
                    self.positioning = *mode;
                }
                self.extruder_positioning = *mode;
            }
            CommandKind::OriginReset => self.apply_origin_reset(params, malformed),
            CommandKind::Home => {
                let named: Vec<Axis> = Axis::ALL
                    .into_iter()
                    .filter(|axis| params.contains_key(&axis.letter()) || malformed.contains(&axis.letter()))
                    .collect();
                let homed = if named.is_empty() { Axis::ALL.to_vec() } else { named };
                for axis in homed {
                    self.position.set(axis, Some(0.0));
                }
            }
            CommandKind::Other { .. } => {}
        }
        false
    }

    fn apply_motion(&mut self, params: &BTreeMap<char, Mm>, malformed: &[char], deposit_epsilon: Mm) -> bool {
        for axis in Axis::ALL {
            let letter = axis.letter();
            if let Some(&value) = params.get(&letter) {
                let next = match self.positioning {
                    Positioning::Absolute => Some(value),
                    Positioning::Relative => self.position.get(axis).map(|current| current + value),
                };
                self.position.set(axis, next);
            } else if malformed.contains(&letter) {
                self.position.set(axis, None);
            }
        }

        let mut is_depositing = false;
        if let Some(&e) = params.get(&'E') {
            let next = match self.extruder_positioning {
                Positioning::Absolute => e,
                Positioning::Relative => self.extruder + e,
            };
            is_depositing = next > self.deposit_baseline + deposit_epsilon;
            self.extruder = next;
            self.deposit_baseline = next;
        }
        if let Some(&f) = params.get(&'F') {
            self.feed_rate = Some(f);
        }
        is_depositing
    }

    fn apply_origin_reset(&mut self, params: &BTreeMap<char, Mm>, malformed: &[char]) {
        let names_any = ['X', 'Y', 'Z', 'E'].iter().any(|l| params.contains_key(l) || malformed.contains(l));
        if !names_any {
            self.position = Position::ORIGIN;
            self.extruder = 0.0;
            self.deposit_baseline = 0.0;
            return;
        }
        for axis in Axis::ALL {
            let letter = axis.letter();
            if let Some(&value) = params.get(&letter) {
                self.position.set(axis, Some(value));
            } else if malformed.contains(&letter) {
                self.position.set(axis, None);
            }
        }
        if let Some(&e) = params.get(&'E') {
            self.extruder = e;
            self.deposit_baseline = e;
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DecodedDocument {
    pub commands: Vec<Command>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    deposit_epsilon: Mm,
}

impl Decoder {
    pub fn new(deposit_epsilon: Mm) -> Decoder {
        Decoder { deposit_epsilon }
    }

    /// Decodes one line against `state`, advancing it. Same line and same state always give the
    /// same command and the same resulting state.
    pub fn decode(&self, line: &str, state: &mut MachineState) -> Command {
        let tokens = tokenize_line(line);
        let kind = classify(tokens.code);
        // "G28 X" and "G92 E" name an axis without a value, which means zero there.
        let accepts_bare = matches!(kind, CommandKind::OriginReset | CommandKind::Home);

        let mut params = BTreeMap::new();
        let mut rejected = Vec::new();
        for word in tokens.params {
            match word {
                ParamWord::Value { letter, value } => {
                    params.insert(letter, value);
                }
                ParamWord::Bare { letter } if accepts_bare => {
                    params.insert(letter, 0.0);
                }
                ParamWord::Bare { letter } => rejected.push(RejectedWord { letter, raw: String::new() }),
                ParamWord::Malformed { letter, raw } => rejected.push(RejectedWord { letter, raw: raw.to_owned() }),
            }
        }
        let malformed: Vec<char> =
            rejected.iter().map(|word| word.letter).filter(|letter| !params.contains_key(letter)).collect();

        let mut tag_marker = false;
        let mut layer_marker = false;
        match tokens.marker {
            Some(CommentMarker::FeatureTag(label)) => {
                state.feature_tag = Some(FeatureTag::new(&label));
                tag_marker = true;
            }
            Some(CommentMarker::LayerBoundary) => layer_marker = true,
            None => {}
        }

        let before = state.snapshot();
        let is_depositing = state.apply(&kind, &params, &malformed, self.deposit_epsilon);
        let after = state.snapshot();

        Command {
            kind,
            params,
            rejected,
            before,
            after,
            feature_tag: state.feature_tag.clone(),
            tag_marker,
            layer_marker,
            line_number: None,
            text: line.trim_end().to_owned(),
            is_depositing,
            positioning: state.positioning,
            extruder_positioning: state.extruder_positioning,
        }
    }

    /// Decodes a whole document from a fresh machine state. Line numbers start at 1.
    pub fn decode_lines<I, S>(&self, lines: I) -> DecodedDocument
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = MachineState::default();
        let mut document = DecodedDocument::default();
        for (i, line) in lines.into_iter().enumerate() {
            let mut command = self.decode(line.as_ref(), &mut state);
            command.line_number = Some(i + 1);
            // Unknown commands keep whatever words they have, eg. M117 messages.
            if !matches!(command.kind, CommandKind::Other { .. }) {
                for word in &command.rejected {
                    warn!("line {}: dropping malformed parameter {}{:?}", i + 1, word.letter, word.raw);
                    document.diagnostics.push(Diagnostic::MalformedParameter {
                        line: i + 1,
                        letter: word.letter,
                        raw: word.raw.clone(),
                    });
                }
            }
            document.commands.push(command);
        }
        document
    }
}

fn classify(code: Option<CodeWord>) -> CommandKind {
    let Some(code) = code else {
        return CommandKind::Other { code: None };
    };
    let set_positioning = |scope, mode| CommandKind::SetPositioning { scope, mode };
    if code.subcode.is_none() {
        match (code.letter, code.number) {
            ('G', 0) => return CommandKind::Motion(MotionCode::Rapid),
            ('G', 1) => return CommandKind::Motion(MotionCode::Linear),
            ('G', 2) => return CommandKind::Motion(MotionCode::ArcClockwise),
            ('G', 3) => return CommandKind::Motion(MotionCode::ArcCounterClockwise),
            ('G', 28) => return CommandKind::Home,
            ('G', 90) => return set_positioning(ModeScope::AllAxes, Positioning::Absolute),
            ('G', 91) => return set_positioning(ModeScope::AllAxes, Positioning::Relative),
            ('G', 92) => return CommandKind::OriginReset,
            ('M', 82) => return set_positioning(ModeScope::Extruder, Positioning::Absolute),
            ('M', 83) => return set_positioning(ModeScope::Extruder, Positioning::Relative),
            _ => {}
        }
    }
    CommandKind::Other { code: Some(code.to_string()) }
}
