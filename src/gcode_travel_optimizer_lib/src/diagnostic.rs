use std::fmt;
use std::ops::Range;

/// Advisory findings collected while optimizing a document. None of these stop the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    MalformedParameter { line: usize, letter: char, raw: String },
    UnresolvedSegment { layer: usize, tag: Option<String>, lines: Range<usize> },
    AllSegmentsUnresolved { layer: usize, tag: Option<String> },
    OrderSensitiveBlock { layer: usize, tag: Option<String> },
    NoFeatureTags,
    BudgetExhausted { layer: usize, tag: Option<String>, passes: usize },
}

struct TagName<'a>(&'a Option<String>);

impl fmt::Display for TagName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(tag) => write!(f, "{:?}", tag),
            None => f.write_str("untagged"),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedParameter { line, letter, raw } => {
                write!(f, "line {}: dropped malformed parameter {}{:?}", line, letter, raw)
            }
            Diagnostic::UnresolvedSegment { layer, tag, lines } => write!(
                f,
                "layer {} block {}: segment at lines {}..{} has no resolvable endpoints, kept in place",
                layer,
                TagName(tag),
                lines.start,
                lines.end
            ),
            Diagnostic::AllSegmentsUnresolved { layer, tag } => {
                write!(f, "layer {} block {}: no segment has resolvable endpoints, order unchanged", layer, TagName(tag))
            }
            Diagnostic::OrderSensitiveBlock { layer, tag } => write!(
                f,
                "layer {} block {}: relative or origin-changing commands, internal order kept",
                layer,
                TagName(tag)
            ),
            Diagnostic::NoFeatureTags => f.write_str("no feature tags found, each layer optimized as one block"),
            Diagnostic::BudgetExhausted { layer, tag, passes } => {
                write!(f, "layer {} block {}: 2-opt stopped by budget after {} passes", layer, TagName(tag), passes)
            }
        }
    }
}
