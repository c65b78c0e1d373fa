//! Groups a decoded command stream into layers, feature blocks and print segments.
//!
//! Nothing is dropped or duplicated here: flattening the layers back out (prologue, then each
//! block's header, segment leads and segment commands, then trailing commands) gives every input
//! command exactly once.

use std::collections::HashMap;
use std::ops::Range;

use crate::command::{Command, FeatureTag, Snapshot};
use crate::geometry::Position;
use crate::Mm;

/// A maximal run of depositing commands under one feature tag, plus the non-depositing commands
/// that led up to it within its block.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintSegment {
    pub lead: Vec<Command>,
    pub commands: Vec<Command>,
}

impl PrintSegment {
    /// Where extrusion begins: the position before the first depositing command.
    pub fn start(&self) -> Position {
        self.commands.first().map_or_else(Position::default, |c| c.before.position)
    }

    pub fn end(&self) -> Position {
        self.commands.last().map_or_else(Position::default, |c| c.after.position)
    }

    pub fn is_resolved(&self) -> bool {
        self.start().planar().is_some() && self.end().planar().is_some()
    }

    /// Extruder value in effect when this segment (lead included) originally started.
    pub fn entry_extruder(&self) -> Mm {
        self.lead.first().or(self.commands.first()).map_or(0.0, |c| c.before.extruder)
    }

    /// Modal feed rate the first depositing command originally ran under.
    pub fn entry_feed_rate(&self) -> Option<Mm> {
        self.commands.first().and_then(|c| c.before.feed_rate)
    }

    /// Source lines of the depositing commands, end exclusive. Empty for synthesized segments.
    pub fn line_range(&self) -> Range<usize> {
        let mut lines = self.commands.iter().filter_map(|c| c.line_number);
        match lines.next() {
            None => 0..0,
            Some(first) => {
                let (low, high) = lines.fold((first, first), |(low, high), line| (low.min(line), high.max(line)));
                low..high + 1
            }
        }
    }

    pub fn all_commands(&self) -> impl Iterator<Item = &Command> {
        self.lead.iter().chain(self.commands.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBlock {
    pub tag: Option<FeatureTag>,
    // tag marker and whatever preceded it, kept at the head of the block
    pub header: Vec<Command>,
    pub segments: Vec<PrintSegment>,
    pub trailing: Vec<Command>,
    // relative moves or origin changes inside, so segments can't be reordered
    pub order_sensitive: bool,
}

impl FeatureBlock {
    fn new(tag: Option<FeatureTag>) -> FeatureBlock {
        FeatureBlock { tag, header: Vec::new(), segments: Vec::new(), trailing: Vec::new(), order_sensitive: false }
    }

    pub fn key(&self) -> Option<&str> {
        self.tag.as_ref().map(FeatureTag::key)
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.header
            .iter()
            .chain(self.segments.iter().flat_map(PrintSegment::all_commands))
            .chain(self.trailing.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub index: usize,
    // z of the first depositing command
    pub z: Option<Mm>,
    pub prologue: Vec<Command>,
    pub blocks: Vec<FeatureBlock>,
    // original machine state after the layer's last command
    pub exit: Option<Snapshot>,
}

impl Layer {
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.prologue.iter().chain(self.blocks.iter().flat_map(FeatureBlock::commands))
    }

    pub fn segment_count(&self) -> usize {
        self.blocks.iter().map(|block| block.segments.len()).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    layer_z_tolerance: Mm,
}

impl Segmenter {
    pub fn new(layer_z_tolerance: Mm) -> Segmenter {
        Segmenter { layer_z_tolerance }
    }

    pub fn segment(&self, commands: Vec<Command>) -> Vec<Layer> {
        let layers = if commands.iter().any(|c| c.layer_marker) {
            split_at_markers(commands)
        } else {
            self.split_at_z_changes(commands)
        };
        layers.into_iter().enumerate().map(|(index, commands)| build_layer(index, commands)).collect()
    }

    fn split_at_z_changes(&self, commands: Vec<Command>) -> Vec<Vec<Command>> {
        let mut layers = Vec::new();
        let mut current: Vec<Command> = Vec::new();
        let mut layer_z: Option<Mm> = None;
        // index in `current` of the first non-depositing command since the last deposit
        let mut since_deposit: Option<usize> = None;

        for command in commands {
            if command.is_depositing {
                if let Some(z) = command.after.position.z {
                    match layer_z {
                        None => layer_z = Some(z),
                        Some(current_z) if (z - current_z).abs() > self.layer_z_tolerance => {
                            let moved = current.split_off(since_deposit.unwrap_or(current.len()));
                            layers.push(std::mem::replace(&mut current, moved));
                            layer_z = Some(z);
                        }
                        Some(_) => {}
                    }
                }
                since_deposit = None;
            } else if since_deposit.is_none() {
                since_deposit = Some(current.len());
            }
            current.push(command);
        }
        if !current.is_empty() {
            layers.push(current);
        }
        layers
    }
}

fn split_at_markers(commands: Vec<Command>) -> Vec<Vec<Command>> {
    let mut layers = Vec::new();
    let mut current = Vec::new();
    for command in commands {
        if command.layer_marker && !current.is_empty() {
            layers.push(std::mem::take(&mut current));
        }
        current.push(command);
    }
    if !current.is_empty() {
        layers.push(current);
    }
    layers
}

fn build_layer(index: usize, mut commands: Vec<Command>) -> Layer {
    let z = commands.iter().find(|c| c.is_depositing).and_then(|c| c.after.position.z);
    let exit = commands.last().map(|c| c.after);
    // A layer can open under the tag the previous one left behind, so its first deposits may come
    // before any marker. Those belong to their tag's block, not the prologue.
    let body_start = commands.iter().position(|c| c.tag_marker || c.is_depositing).unwrap_or(commands.len());
    let body = commands.split_off(body_start);
    Layer { index, z, prologue: commands, blocks: group_blocks(body), exit }
}

struct OpenRun {
    block: usize,
    lead: Vec<Command>,
    commands: Vec<Command>,
    // comment lines seen inside the run, absorbed only if the run goes on
    held: Vec<Command>,
}

struct BlockBuilder {
    block: FeatureBlock,
    pending: Vec<Command>,
}

fn group_blocks(body: Vec<Command>) -> Vec<FeatureBlock> {
    let mut builders: Vec<BlockBuilder> = Vec::new();
    let mut index_of: HashMap<Option<String>, usize> = HashMap::new();
    let mut run: Option<OpenRun> = None;

    for command in body {
        let b = *index_of.entry(command.tag_key().map(str::to_owned)).or_insert_with(|| {
            builders.push(BlockBuilder { block: FeatureBlock::new(command.feature_tag.clone()), pending: Vec::new() });
            builders.len() - 1
        });

        if command.is_depositing {
            if let Some(open) = run.as_mut().filter(|open| open.block == b) {
                open.commands.append(&mut open.held);
                open.commands.push(command);
                continue;
            }
            close_run(&mut builders, run.take());
            let builder = &mut builders[b];
            let mut lead = std::mem::take(&mut builder.pending);
            if builder.block.segments.is_empty() && builder.block.header.is_empty() {
                if let Some(marker) = lead.iter().rposition(|c| c.tag_marker) {
                    let rest = lead.split_off(marker + 1);
                    builder.block.header = std::mem::replace(&mut lead, rest);
                }
            }
            run = Some(OpenRun { block: b, lead, commands: vec![command], held: Vec::new() });
        } else {
            let absorbable = command.is_comment_only() && !command.tag_marker && !command.layer_marker;
            if let Some(open) = run.as_mut().filter(|open| open.block == b && absorbable) {
                open.held.push(command);
                continue;
            }
            close_run(&mut builders, run.take());
            builders[b].pending.push(command);
        }
    }
    close_run(&mut builders, run.take());

    builders
        .into_iter()
        .map(|BlockBuilder { mut block, pending }| {
            block.trailing = pending;
            let order_sensitive = block.commands().any(Command::is_order_sensitive);
            block.order_sensitive = order_sensitive;
            block
        })
        .collect()
}

fn close_run(builders: &mut [BlockBuilder], run: Option<OpenRun>) {
    if let Some(run) = run {
        let builder = &mut builders[run.block];
        builder.block.segments.push(PrintSegment { lead: run.lead, commands: run.commands });
        builder.pending.extend(run.held);
    }
}
