//! Reorders the printed segments of gcode to cut down on travel between them.
//!
//! Pipeline, one way only:
//!
//! 1. **Decode**: each line becomes a [`Command`] with resolved positions before and after it.
//! 2. **Segment**: commands are grouped into layers, feature blocks (by `TYPE:`/`FEATURE:` tag)
//!    and print segments (runs of depositing moves).
//! 3. **Optimize**: within each feature block, segments are ordered by nearest neighbour and then
//!    refined with 2-opt.
//! 4. **Regenerate**: blocks are emitted in feature precedence order with travel moves inserted
//!    where a segment no longer starts where the nozzle is.
//! 5. **Filter**: moves that go nowhere are dropped.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

pub mod command;
pub mod config;
pub mod decoder;
pub mod diagnostic;
pub mod error;
pub mod feature_order;
pub mod geometry;
pub mod redundant;
pub mod regenerate;
pub mod segmenter;
pub mod tokenizer;
pub mod travel;

pub use command::{Command, CommandKind, FeatureTag};
pub use config::{FeedLimits, OptimizerConfig};
pub use decoder::{Decoder, MachineState};
pub use diagnostic::Diagnostic;
pub use error::{OptimizeError, Result};
pub use redundant::RedundantMoveFilter;
pub use regenerate::{regenerate, Regenerator};
pub use segmenter::{FeatureBlock, Layer, PrintSegment, Segmenter};
pub use travel::{plan_tour, TourBudget, TourReport, TourStop};

// This way we can switch to f32 easily for comparing memory and performance.
pub type Mm = f64;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OptimizeReport {
    pub lines_in: usize,
    pub lines_out: usize,
    pub layers: usize,
    pub blocks: usize,
    pub segments: usize,
    pub blocks_reordered: usize,
    pub redundant_moves_removed: usize,
    // planar travel between segment ends and starts, summed over all blocks
    pub travel_before: Mm,
    pub travel_after: Mm,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs the whole pipeline over in-memory lines. Never fails: anything it can't make sense of is
/// passed through unchanged and reported in the diagnostics.
pub fn optimize_lines<I, S>(lines: I, config: &OptimizerConfig) -> (Vec<String>, OptimizeReport)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let decoded = Decoder::new(config.deposit_epsilon).decode_lines(lines);
    let mut report = OptimizeReport {
        lines_in: decoded.commands.len(),
        diagnostics: decoded.diagnostics,
        ..OptimizeReport::default()
    };
    if !decoded.commands.is_empty() && !decoded.commands.iter().any(|c| c.tag_marker) {
        info!("no feature tags found, optimizing each layer as one block");
        report.diagnostics.push(Diagnostic::NoFeatureTags);
    }

    let layers = Segmenter::new(config.layer_z_tolerance).segment(decoded.commands);
    report.layers = layers.len();

    let budget = config.tour_budget();
    let mut regenerator = Regenerator::new(config);
    for mut layer in layers {
        for command in &layer.prologue {
            regenerator.emit_verbatim(command);
        }
        feature_order::order_blocks(&mut layer.blocks);
        for block in &layer.blocks {
            let entry = regenerator.cursor().position.planar();
            let order = plan_block(layer.index, block, entry, &budget, &mut report);
            regenerator.emit_block(block, &order, layer.z);
        }
        regenerator.finish_layer(layer.exit);
    }

    let mut commands = regenerator.into_commands();
    if config.filter_redundant_moves {
        let before = commands.len();
        commands = RedundantMoveFilter::new(config.redundant_move_tolerance).filter(commands);
        report.redundant_moves_removed = before - commands.len();
    }
    report.lines_out = commands.len();
    (commands.into_iter().map(|c| c.text).collect(), report)
}

fn plan_block(
    layer: usize,
    block: &FeatureBlock,
    entry: Option<geometry::Point>,
    budget: &TourBudget,
    report: &mut OptimizeReport,
) -> Vec<usize> {
    report.blocks += 1;
    report.segments += block.segments.len();
    let tag = block.tag.as_ref().map(|tag| tag.label().to_owned());

    if block.order_sensitive {
        debug!("layer {} block {:?}: keeping internal order", layer, tag);
        let identity: Vec<usize> = (0..block.segments.len()).collect();
        let cost = travel::tour_cost_of(&block.segments, &identity, entry);
        report.travel_before += cost;
        report.travel_after += cost;
        report.diagnostics.push(Diagnostic::OrderSensitiveBlock { layer, tag });
        return identity;
    }

    let tour = plan_tour(&block.segments, entry, budget);
    for &index in &tour.pinned {
        let lines = block.segments[index].line_range();
        warn!("layer {} block {:?}: segment at lines {:?} can't be resolved, leaving it in place", layer, tag, lines);
        report.diagnostics.push(Diagnostic::UnresolvedSegment { layer, tag: tag.clone(), lines });
    }
    if tour.all_pinned() {
        report.diagnostics.push(Diagnostic::AllSegmentsUnresolved { layer, tag: tag.clone() });
    }
    if tour.budget_exhausted {
        warn!("layer {} block {:?}: 2-opt cut off by budget after {} passes", layer, tag, tour.passes);
        report.diagnostics.push(Diagnostic::BudgetExhausted { layer, tag: tag.clone(), passes: tour.passes });
    }
    if tour.is_reordered() {
        report.blocks_reordered += 1;
    }
    report.travel_before += tour.original_cost;
    report.travel_after += tour.final_cost;
    tour.order
}

/// Drops moves that go nowhere, without reordering anything.
pub fn filter_redundant_lines<I, S>(lines: I, config: &OptimizerConfig) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let commands = Decoder::new(config.deposit_epsilon).decode_lines(lines).commands;
    RedundantMoveFilter::new(config.redundant_move_tolerance)
        .filter(commands)
        .into_iter()
        .map(|c| c.text)
        .collect()
}

// output can be the same path as input, so we can't overwrite output until we're sure we have
// complete output
pub fn process_files(input: impl AsRef<Path>, output: impl AsRef<Path>, config: &OptimizerConfig) -> Result<OptimizeReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    config.validate()?;

    info!("reading {}...", input.display());
    let before_read = Instant::now();
    let lines = file_lines(input)?;
    info!("done reading - lines: {} elapsed: {:.2?}", lines.len(), before_read.elapsed());

    let before_optimize = Instant::now();
    let (output_lines, report) = optimize_lines(&lines, config);
    info!(
        "done optimizing - layers: {} blocks: {} reordered: {} segments: {} redundant moves removed: {} travel: {:.1} -> {:.1} elapsed: {:.2?}",
        report.layers,
        report.blocks,
        report.blocks_reordered,
        report.segments,
        report.redundant_moves_removed,
        report.travel_before,
        report.travel_after,
        before_optimize.elapsed()
    );

    let mut tmp_output = output.as_os_str().to_owned();
    tmp_output.push(".tmp");
    let tmp_output = PathBuf::from(tmp_output);
    write_lines(&tmp_output, &output_lines)?;
    fs::rename(&tmp_output, output).map_err(OptimizeError::io(output))?;
    info!("wrote {}", output.display());
    Ok(report)
}

fn file_lines(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path).map_err(OptimizeError::io(path))?;
    io::BufReader::with_capacity(64 * 1024, file)
        .lines()
        .collect::<io::Result<Vec<_>>>()
        .map_err(OptimizeError::io(path))
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let file = fs::File::create(path).map_err(OptimizeError::io(path))?;
    let mut buf_writer = io::BufWriter::with_capacity(8 * 1024, file);
    for line in lines {
        writeln!(buf_writer, "{}", line).map_err(OptimizeError::io(path))?;
    }
    buf_writer.flush().map_err(OptimizeError::io(path))
}
