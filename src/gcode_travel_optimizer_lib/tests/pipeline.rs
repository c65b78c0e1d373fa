use gcode_travel_optimizer_lib::geometry::Point;
use gcode_travel_optimizer_lib::{
    filter_redundant_lines, optimize_lines, plan_tour, travel, Decoder, Diagnostic, OptimizerConfig, Segmenter,
    TourBudget,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn optimize(lines: &[&str]) -> (Vec<String>, gcode_travel_optimizer_lib::OptimizeReport) {
    optimize_lines(lines, &OptimizerConfig::default())
}

fn index_of(lines: &[String], text: &str) -> usize {
    lines.iter().position(|line| line == text).unwrap_or_else(|| panic!("{:?} missing from {:#?}", text, lines))
}

#[test]
fn nearest_segment_first_across_two_segments() {
    let lines = [
        "G0 X0 Y0 Z0.2 F1800",
        ";TYPE:PERIMETER",
        "G0 X10 Y10",
        "G1 X20 Y10 E1",
        ";TYPE:FILL",
        "G0 X50 Y50",
        "G1 X60 Y50 E2",
    ];
    let commands = Decoder::new(1e-5).decode_lines(lines).commands;
    let layers = Segmenter::new(1e-3).segment(commands);
    let segments: Vec<_> = layers[0].blocks.iter().flat_map(|block| block.segments.iter().cloned()).collect();
    assert_eq!(segments.len(), 2);

    let entry = Some(Point::new(0.0, 0.0, 0.0));
    assert_eq!(travel::nearest_neighbor_order(&segments, entry), vec![0, 1]);
    let report = plan_tour(&segments, entry, &TourBudget::default());
    assert_eq!(report.order, vec![0, 1]);
    assert!((report.nn_cost - report.final_cost).abs() < 1e-12);
    assert!((report.final_cost - (200f64.sqrt() + 50.0)).abs() < 1e-9);
}

#[test]
fn repeated_travel_is_filtered() {
    let input = ["G0 X5 Y5 Z0.2 F3000", "G0 X10 Y10 Z0.2", "G0 X10 Y10 Z0.2", "G1 X20 Y10 E1"];
    let expected = vec!["G0 X5 Y5 Z0.2 F3000", "G0 X10 Y10 Z0.2", "G1 X20 Y10 E1"];
    assert_eq!(filter_redundant_lines(input, &OptimizerConfig::default()), expected);
    let (lines, report) = optimize(&input);
    assert_eq!(lines, expected);
    assert_eq!(report.redundant_moves_removed, 1);
}

#[test]
fn blocks_follow_feature_precedence() {
    let input = [
        "G28",
        "G0 X0 Y0 Z0.2 F1800",
        ";TYPE:FILL",
        "G0 X20 Y20",
        "G1 X30 Y20 E1",
        ";TYPE:SKIRT",
        "G0 X0 Y0",
        "G1 X40 Y0 E2",
        ";TYPE:PERIMETER",
        "G0 X10 Y10",
        "G1 X35 Y10 E3",
    ];
    let (lines, report) = optimize(&input);
    assert_eq!(
        lines,
        vec![
            "G28",
            "G0 X0 Y0 Z0.2 F1800",
            ";TYPE:SKIRT",
            "G92 E1",
            "G1 X40 Y0 E2",
            ";TYPE:PERIMETER",
            "G0 X10 Y10",
            "G1 X35 Y10 E3",
            ";TYPE:FILL",
            "G92 E0",
            "G0 X20 Y20",
            "G1 X30 Y20 E1",
            "G92 E3",
        ]
    );
    assert_eq!(report.blocks, 3);
    assert_eq!(report.blocks_reordered, 0);
    assert!(report.diagnostics.is_empty());
}

#[test]
fn unresolved_segment_keeps_its_slot() {
    let input = [
        "G0 X0 Y0 Z0.2 F1800",
        ";TYPE:FILL",
        "G0 X50 Y0",
        "G1 X51 Y0 E1",
        "G0 Xbad Y5",
        "G1 X2 Y5 E2",
        "G0 X10 Y0",
        "G1 X11 Y0 E3",
        "G0 X1 Y0",
        "G1 X2 Y0 E4",
    ];
    let (lines, report) = optimize(&input);
    assert_eq!(
        lines,
        vec![
            "G0 X0 Y0 Z0.2 F1800",
            ";TYPE:FILL",
            "G92 E3",
            "G0 X1 Y0",
            "G1 X2 Y0 E4",
            "G92 E1",
            "G0 Xbad Y5",
            "G1 X2 Y5 E2",
            "G0 X10 Y0",
            "G1 X11 Y0 E3",
            "G92 E0",
            "G0 X50 Y0",
            "G1 X51 Y0 E1",
            "G92 E4",
        ]
    );
    assert_eq!(
        report.diagnostics,
        vec![
            Diagnostic::MalformedParameter { line: 5, letter: 'X', raw: "bad".into() },
            Diagnostic::UnresolvedSegment { layer: 0, tag: Some("FILL".into()), lines: 6..7 },
        ]
    );
    assert_eq!(report.blocks_reordered, 1);
}

#[test]
fn untagged_layers_are_still_optimized() {
    let input = ["G0 X0 Y0 Z0.2 F1800", "G1 X1 Y0 E1", "G0 X50 Y0", "G1 X51 Y0 E2", "G0 X2 Y0", "G1 X3 Y0 E3"];
    let (lines, report) = optimize(&input);
    assert_eq!(
        lines,
        vec![
            "G0 X0 Y0 Z0.2 F1800",
            "G1 X1 Y0 E1",
            "G92 E2",
            "G0 X2 Y0",
            "G1 X3 Y0 E3",
            "G92 E1",
            "G0 X50 Y0",
            "G1 X51 Y0 E2",
            "G92 E3",
        ]
    );
    assert_eq!(report.diagnostics, vec![Diagnostic::NoFeatureTags]);
    assert_eq!(report.travel_before, 98.0);
    assert_eq!(report.travel_after, 48.0);
}

#[test]
fn layers_are_optimized_independently() {
    let input = [
        ";LAYER:0",
        "G0 X0 Y0 Z0.2 F1800",
        ";TYPE:FILL",
        "G0 X10 Y10",
        "G1 X20 Y10 E1",
        ";TYPE:SKIRT",
        "G0 X0 Y0",
        "G1 X30 Y0 E2",
        ";LAYER:1",
        "G0 Z0.4",
        ";TYPE:FILL",
        "G0 X10 Y10",
        "G1 X20 Y10 E3",
        ";TYPE:SKIRT",
        "G0 X0 Y0",
        "G1 X30 Y0 E4",
    ];
    let (lines, report) = optimize(&input);
    assert_eq!(report.layers, 2);
    let layer_1 = index_of(&lines, ";LAYER:1");
    assert!(index_of(&lines, "G1 X30 Y0 E2") < index_of(&lines, "G1 X20 Y10 E1"));
    assert!(index_of(&lines, "G1 X20 Y10 E1") < layer_1);
    assert!(layer_1 < index_of(&lines, "G0 Z0.4"));
    assert!(index_of(&lines, "G0 Z0.4") < index_of(&lines, "G1 X30 Y0 E4"));
    assert!(index_of(&lines, "G1 X30 Y0 E4") < index_of(&lines, "G1 X20 Y10 E3"));
    assert_eq!(lines.last().map(String::as_str), Some("G92 E4"));
}

#[test]
fn order_sensitive_block_keeps_its_internal_order() {
    let input = [
        "G0 X0 Y0 Z0.2 F1800",
        ";TYPE:FILL",
        "G0 X50 Y0",
        "G1 X51 Y0 E1",
        "G91",
        "G1 X1 E0.5",
        "G90",
        "G0 X1 Y0",
        "G1 X2 Y0 E2",
    ];
    let (lines, report) = optimize(&input);
    assert_eq!(lines, input.to_vec());
    assert!(report.diagnostics.contains(&Diagnostic::OrderSensitiveBlock { layer: 0, tag: Some("FILL".into()) }));
}

#[test]
fn empty_document() {
    let (lines, report) = optimize(&[]);
    assert!(lines.is_empty());
    assert!(report.diagnostics.is_empty());
}

#[test]
fn layer_opening_under_a_carried_tag_still_follows_precedence() {
    let body = [
        "G1 X10 Y0 E1",
        "G0 X30 Y5 Z0.4",
        "G1 X31 Y5 E2",
        ";TYPE:PERIMETER",
        "G0 X10 Y5",
        "G1 X11 Y5 E3",
    ];
    let by_z: Vec<&str> = ["G0 X0 Y0 Z0.2 F1800", ";TYPE:FILL"].into_iter().chain(body).collect();
    let by_marker: Vec<&str> = [";LAYER:0", "G0 X0 Y0 Z0.2 F1800", ";TYPE:FILL", "G1 X10 Y0 E1", ";LAYER:1"]
        .into_iter()
        .chain(body[1..].iter().copied())
        .collect();
    for input in [by_z, by_marker] {
        let (lines, report) = optimize(&input);
        assert_eq!(report.layers, 2);
        assert!(index_of(&lines, "G1 X10 Y0 E1") < index_of(&lines, "G1 X11 Y5 E3"));
        assert!(index_of(&lines, "G1 X11 Y5 E3") < index_of(&lines, "G1 X31 Y5 E2"));
    }
}

const TAGS: [&str; 4] = ["SKIRT", "Perimeter", "FILL", "Custom"];

#[derive(Debug, Clone)]
struct Block {
    tag: usize,
    segments: Vec<(u8, u8, u8, u8)>,
    // starts a new layer
    new_layer: bool,
    // writes its own ;TYPE: line instead of printing under whatever tag came before
    fresh_tag: bool,
}

struct Document {
    lines: Vec<String>,
    // (layer, tag in effect) of each depositing line, in input order
    deposits: Vec<(usize, usize)>,
}

fn document(blocks: &[Block], layer_markers: bool) -> Document {
    let mut lines = Vec::new();
    if layer_markers {
        lines.push(";LAYER:0".to_owned());
    }
    lines.push("G0 X0 Y0 Z0.2 F1800".to_owned());
    let mut deposits = Vec::new();
    let (mut e, mut layer, mut tag) = (0, 0, None);
    for block in blocks {
        if block.new_layer && tag.is_some() {
            layer += 1;
            if layer_markers {
                lines.push(format!(";LAYER:{}", layer));
            }
            lines.push(format!("G0 Z{:.1}", 0.2 * (layer + 1) as f64));
        }
        if block.fresh_tag || tag.is_none() {
            lines.push(format!(";TYPE:{}", TAGS[block.tag]));
            tag = Some(block.tag);
        }
        for &(x0, y0, x1, y1) in &block.segments {
            e += 1;
            lines.push(format!("G0 X{} Y{}", x0, y0));
            lines.push(format!("G1 X{} Y{} E{}", x1, y1, e));
            deposits.push((layer, tag.unwrap_or(block.tag)));
        }
    }
    Document { lines, deposits }
}

fn blocks() -> impl Strategy<Value = Vec<Block>> {
    let block = (0..TAGS.len(), prop::collection::vec(any::<(u8, u8, u8, u8)>(), 1..6), any::<bool>(), any::<bool>())
        .prop_map(|(tag, segments, new_layer, fresh_tag)| Block { tag, segments, new_layer, fresh_tag });
    prop::collection::vec(block, 1..8)
}

proptest! {
    #[test]
    fn every_deposit_is_emitted_once_in_precedence_order(blocks in blocks(), layer_markers in any::<bool>()) {
        let document = document(&blocks, layer_markers);
        let (lines, report) = optimize_lines(&document.lines, &OptimizerConfig::default());

        let mut emitted = Vec::new();
        for (i, &(layer, tag)) in document.deposits.iter().enumerate() {
            let suffix = format!(" E{}", i + 1);
            let hits: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| line.starts_with("G1 X") && line.ends_with(&suffix))
                .map(|(at, _)| at)
                .collect();
            prop_assert_eq!(hits.len(), 1);
            emitted.push((hits[0], layer, tag));
        }
        // Layers stay in order; within one, SKIRT, PERIMETER and FILL are listed in that order and
        // the unlisted Custom goes last.
        emitted.sort();
        let order: Vec<(usize, usize)> = emitted.iter().map(|&(_, layer, tag)| (layer, tag)).collect();
        let mut sorted = order.clone();
        sorted.sort();
        prop_assert_eq!(order, sorted);
        prop_assert!(report.travel_after <= report.travel_before + 1e-9);
    }

    #[test]
    fn segments_are_permuted_not_changed(blocks in blocks(), layer_markers in any::<bool>()) {
        let input = document(&blocks, layer_markers).lines;
        let (lines, _) = optimize_lines(&input, &OptimizerConfig::default().with_filter_redundant_moves(false));
        let mut deposits_in: Vec<&String> = input.iter().filter(|line| line.starts_with("G1 X")).collect();
        let mut deposits_out: Vec<&String> = lines.iter().filter(|line| line.starts_with("G1 X")).collect();
        deposits_in.sort();
        deposits_out.sort();
        prop_assert_eq!(deposits_in, deposits_out);
    }
}
