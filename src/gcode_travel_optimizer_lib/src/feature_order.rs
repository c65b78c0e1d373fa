use crate::command::normalize_tag;
use crate::segmenter::FeatureBlock;

/// Print order of structural features, outermost first. Slicers spell these differently, so each
/// family lists the variants seen in the wild. Keys are already normalized.
pub const FEATURE_ORDER: &[&str] = &[
    "SKIRT",
    "BRIM",
    "SKIRT/BRIM",
    "PERIMETER",
    "EXTERNAL PERIMETER",
    "WALL-OUTER",
    "OUTER WALL",
    "OVERHANG PERIMETER",
    "WALL-INNER",
    "INNER WALL",
    "FILL",
    "INFILL",
    "INTERNAL INFILL",
    "SPARSE INFILL",
    "SOLID INFILL",
    "INTERNAL SOLID INFILL",
    "TOP SOLID INFILL",
    "SKIN",
    "GAP FILL",
    "BRIDGE",
    "BRIDGE INFILL",
    "SUPPORT",
    "SUPPORT MATERIAL",
    "SUPPORT-INTERFACE",
    "SUPPORT INTERFACE",
    "SUPPORT MATERIAL INTERFACE",
];

pub fn rank(label: &str) -> Option<usize> {
    let key = normalize_tag(label);
    FEATURE_ORDER.iter().position(|&listed| listed == key)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Placement<'a> {
    Untagged,
    Listed(usize),
    Unlisted(&'a str),
}

fn placement(block: &FeatureBlock) -> Placement<'_> {
    match block.key() {
        None => Placement::Untagged,
        Some(key) => match FEATURE_ORDER.iter().position(|&listed| listed == key) {
            Some(rank) => Placement::Listed(rank),
            None => Placement::Unlisted(key),
        },
    }
}

/// Puts blocks into emission order: untagged content first, then listed features by precedence,
/// then unlisted ones lexicographically by key.
pub fn order_blocks(blocks: &mut [FeatureBlock]) {
    blocks.sort_by(|a, b| placement(a).cmp(&placement(b)));
}
