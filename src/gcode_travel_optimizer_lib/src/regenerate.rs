//! Turns reordered segments back into commands.
//!
//! The regenerator keeps its own machine state (the cursor) for the OUTPUT stream: every emitted
//! command, copied or synthesized, is replayed through the decoder, so travel and extruder
//! decisions are made against where the machine will actually be, not where it was in the input.

use std::fmt::Write as fmt_Write;

use crate::command::{Command, Positioning, Snapshot};
use crate::config::OptimizerConfig;
use crate::decoder::{Decoder, MachineState};
use crate::geometry::{Axis, Position};
use crate::segmenter::{FeatureBlock, PrintSegment};
use crate::Mm;

/// Formats with at most `decimals` fraction digits, trailing zeros dropped.
pub fn format_number(value: Mm, decimals: usize) -> String {
    let mut text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_owned();
    }
    text
}

pub struct Regenerator<'a> {
    config: &'a OptimizerConfig,
    decoder: Decoder,
    cursor: MachineState,
    output: Vec<Command>,
}

impl<'a> Regenerator<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Regenerator<'a> {
        Self::starting_at(config, MachineState::default())
    }

    pub fn starting_at(config: &'a OptimizerConfig, cursor: MachineState) -> Regenerator<'a> {
        Regenerator { config, decoder: Decoder::new(config.deposit_epsilon), cursor, output: Vec::new() }
    }

    pub fn cursor(&self) -> &MachineState {
        &self.cursor
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.output
    }

    /// Re-emits an input command unchanged, keeping its source line and feature tag.
    pub fn emit_verbatim(&mut self, original: &Command) {
        let mut command = self.decoder.decode(&original.text, &mut self.cursor);
        command.line_number = original.line_number;
        command.feature_tag = original.feature_tag.clone();
        self.output.push(command);
    }

    fn emit_synthesized(&mut self, text: String) {
        let command = self.decoder.decode(&text, &mut self.cursor);
        self.output.push(command);
    }

    /// Emits a block's header, then the segments picked by `order`, then its trailing commands.
    pub fn emit_block(&mut self, block: &FeatureBlock, order: &[usize], layer_z: Option<Mm>) {
        for command in &block.header {
            self.emit_verbatim(command);
        }
        for segment in order.iter().filter_map(|&index| block.segments.get(index)) {
            self.emit_segment(segment, layer_z);
        }
        for command in &block.trailing {
            self.emit_verbatim(command);
        }
    }

    pub fn emit_segment(&mut self, segment: &PrintSegment, layer_z: Option<Mm>) {
        self.resync_extruder(segment.entry_extruder());
        for command in &segment.lead {
            self.emit_verbatim(command);
        }
        self.travel_to(segment.start(), layer_z);

        let first_motion = segment.commands.iter().find(|c| c.is_motion());
        if first_motion.is_some_and(|c| c.feed_rate().is_none()) {
            let feed_rate = segment
                .entry_feed_rate()
                .unwrap_or_else(|| self.config.print_feed(self.config.extrude_feed_rate));
            self.restore_feed_rate(feed_rate);
        }

        for command in &segment.commands {
            self.emit_verbatim(command);
        }
        // A segment we couldn't follow still ends where the input said it did.
        let declared_end = segment.end();
        for axis in Axis::ALL {
            if self.cursor.position.get(axis).is_none() {
                self.cursor.position.set(axis, declared_end.get(axis));
            }
        }
    }

    /// Puts extruder and feed rate back to what the input had at the end of the layer, so whatever
    /// follows runs under the state it was written for.
    pub fn finish_layer(&mut self, exit: Option<Snapshot>) {
        let Some(exit) = exit else {
            return;
        };
        self.resync_extruder(exit.extruder);
        if let Some(feed_rate) = exit.feed_rate {
            self.restore_feed_rate(feed_rate);
        }
    }

    fn resync_extruder(&mut self, expected: Mm) {
        if !self.config.resync_extruder || self.cursor.extruder_positioning != Positioning::Absolute {
            return;
        }
        if (self.cursor.extruder - expected).abs() > self.config.deposit_epsilon {
            let text = format!("G92 E{}", format_number(expected, self.config.decimals.extrusion));
            self.emit_synthesized(text);
        }
    }

    fn restore_feed_rate(&mut self, feed_rate: Mm) {
        let decimals = self.config.decimals.feed_rate;
        let wanted = format_number(feed_rate, decimals);
        if self.cursor.feed_rate.map(|current| format_number(current, decimals)).as_ref() != Some(&wanted) {
            self.emit_synthesized(format!("G1 F{}", wanted));
        }
    }

    /// Inserts a travel move to `start`, naming only the axes that need to change.
    fn travel_to(&mut self, start: Position, layer_z: Option<Mm>) {
        let (Some(x), Some(y)) = (start.x, start.y) else {
            return;
        };
        // An absolute G0 would mean something else entirely under G91.
        if self.cursor.positioning != Positioning::Absolute {
            return;
        }
        let decimals = self.config.decimals;
        let mut words = String::new();
        for (axis, target) in [(Axis::X, Some(x)), (Axis::Y, Some(y)), (Axis::Z, start.z.or(layer_z))] {
            let Some(target) = target else {
                continue;
            };
            let differs = match self.cursor.position.get(axis) {
                Some(current) => (current - target).abs() > self.config.positional_tolerance,
                None => true,
            };
            if differs {
                // String as fmt::Write can't fail.
                let _ = write!(words, " {}{}", axis.letter(), format_number(target, decimals.coordinate));
            }
        }
        if words.is_empty() {
            return;
        }
        let text = format!("G0{} F{}", words, format_number(self.config.travel_feed(), decimals.feed_rate));
        self.emit_synthesized(text);
    }
}

/// Emits `segments` in the given order starting from `start`, inserting travel where needed.
pub fn regenerate<'s>(
    segments: impl IntoIterator<Item = &'s PrintSegment>,
    start: MachineState,
    layer_z: Option<Mm>,
    config: &OptimizerConfig,
) -> Vec<Command> {
    let mut regenerator = Regenerator::starting_at(config, start);
    for segment in segments {
        regenerator.emit_segment(segment, layer_z);
    }
    regenerator.into_commands()
}
