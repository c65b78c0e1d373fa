//! Splits one line of gcode into typed words, so nothing downstream looks at raw text again.

use std::sync::LazyLock;

use regex::Regex;

use crate::Mm;

static CODE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<letter>[GMTgmt])(?<number>[0-9]+)(?:\.(?<subcode>[0-9]+))?$").expect("code word pattern")
});
// Deliberately narrower than what str::parse::<f64> takes: no exponents, no inf/nan.
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)$").expect("number pattern"));
static FEATURE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:TYPE|FEATURE)\s*:\s*(?<label>.*?)\s*$").expect("feature marker pattern"));
static LAYER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*LAYER(?:_CHANGE\b|\s*:\s*[-+]?[0-9]+)").expect("layer marker pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeWord {
    pub letter: char,
    pub number: u32,
    pub subcode: Option<u32>,
}

impl CodeWord {
    pub fn is(&self, letter: char, number: u32) -> bool {
        self.letter == letter && self.number == number && self.subcode.is_none()
    }
}

impl std::fmt::Display for CodeWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.letter, self.number)?;
        if let Some(subcode) = self.subcode {
            write!(f, ".{}", subcode)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamWord<'a> {
    Value { letter: char, value: Mm },
    // eg. the X in "G28 X"
    Bare { letter: char },
    Malformed { letter: char, raw: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentMarker {
    FeatureTag(String),
    LayerBoundary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedLine<'a> {
    pub code: Option<CodeWord>,
    pub params: Vec<ParamWord<'a>>,
    pub comment: Option<&'a str>,
    pub marker: Option<CommentMarker>,
}

pub fn tokenize_line(line: &str) -> TokenizedLine<'_> {
    let (code_part, comment) = split_comment(line);

    let mut words = code_part.split_whitespace().peekable();
    let code = words.peek().and_then(|word| parse_code_word(word));
    if code.is_some() {
        words.next();
    }
    let params = words.map(parse_param_word).collect();
    let marker = comment.and_then(comment_marker);

    TokenizedLine { code, params, comment, marker }
}

fn split_comment(line: &str) -> (&str, Option<&str>) {
    match line.find([';', '(']) {
        None => (line, None),
        Some(at) => {
            let (code_part, rest) = line.split_at(at);
            let comment = if rest.starts_with('(') {
                rest[1..].trim_end().trim_end_matches(')')
            } else {
                &rest[1..]
            };
            (code_part, Some(comment))
        }
    }
}

fn parse_code_word(word: &str) -> Option<CodeWord> {
    let captures = CODE_WORD.captures(word)?;
    let letter = captures.name("letter")?.as_str().chars().next()?.to_ascii_uppercase();
    let number = captures.name("number")?.as_str().parse().ok()?;
    let subcode = match captures.name("subcode") {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    Some(CodeWord { letter, number, subcode })
}

fn parse_param_word(word: &str) -> ParamWord<'_> {
    let mut chars = word.chars();
    // split_whitespace never yields an empty word
    let first = chars.next().unwrap_or('?');
    let raw = chars.as_str();
    if !first.is_ascii_alphabetic() {
        return ParamWord::Malformed { letter: first, raw: word };
    }
    let letter = first.to_ascii_uppercase();
    if raw.is_empty() {
        return ParamWord::Bare { letter };
    }
    if !NUMBER.is_match(raw) {
        return ParamWord::Malformed { letter, raw };
    }
    match raw.parse::<Mm>() {
        Ok(value) => ParamWord::Value { letter, value },
        Err(_) => ParamWord::Malformed { letter, raw },
    }
}

fn comment_marker(comment: &str) -> Option<CommentMarker> {
    if let Some(captures) = FEATURE_MARKER.captures(comment) {
        let label = captures.name("label").map_or("", |m| m.as_str());
        if !label.is_empty() {
            return Some(CommentMarker::FeatureTag(label.to_owned()));
        }
    }
    if LAYER_MARKER.is_match(comment) {
        return Some(CommentMarker::LayerBoundary);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn motion_line_with_comment() {
        let t = tokenize_line("G1 X10.5 y-2 E.25 F1200 ; outer wall");
        assert_eq!(t.code, Some(CodeWord { letter: 'G', number: 1, subcode: None }));
        assert_eq!(
            t.params,
            vec![
                ParamWord::Value { letter: 'X', value: 10.5 },
                ParamWord::Value { letter: 'Y', value: -2.0 },
                ParamWord::Value { letter: 'E', value: 0.25 },
                ParamWord::Value { letter: 'F', value: 1200.0 },
            ]
        );
        assert_eq!(t.comment, Some(" outer wall"));
        assert_eq!(t.marker, None);
    }

    #[test]
    fn malformed_and_bare_words() {
        let t = tokenize_line("G28 X Yabc Z1e3");
        assert_eq!(
            t.params,
            vec![
                ParamWord::Bare { letter: 'X' },
                ParamWord::Malformed { letter: 'Y', raw: "abc" },
                ParamWord::Malformed { letter: 'Z', raw: "1e3" },
            ]
        );
    }

    #[test]
    fn subcodes_and_leading_zeros() {
        assert_eq!(tokenize_line("G01 X1").code, Some(CodeWord { letter: 'G', number: 1, subcode: None }));
        let code = tokenize_line("G29.1").code.unwrap();
        assert_eq!(code.subcode, Some(1));
        assert_eq!(code.to_string(), "G29.1");
        assert!(!code.is('G', 29));
    }

    #[test]
    fn comment_only_and_blank_lines() {
        let t = tokenize_line(";TYPE:Skirt/Brim");
        assert_eq!(t.code, None);
        assert!(t.params.is_empty());
        assert_eq!(t.marker, Some(CommentMarker::FeatureTag("Skirt/Brim".into())));

        let blank = tokenize_line("   ");
        assert_eq!(blank.code, None);
        assert!(blank.params.is_empty());
        assert_eq!(blank.comment, None);
    }

    #[test]
    fn feature_markers_are_case_insensitive_and_free_form() {
        assert_eq!(
            tokenize_line("; feature :  External perimeter ").marker,
            Some(CommentMarker::FeatureTag("External perimeter".into()))
        );
        assert_eq!(tokenize_line(";type:FILL").marker, Some(CommentMarker::FeatureTag("FILL".into())));
        assert_eq!(tokenize_line(";TYPE:").marker, None);
        assert_eq!(tokenize_line("; width: 0.4").marker, None);
    }

    #[test]
    fn layer_markers() {
        assert_eq!(tokenize_line(";LAYER:3").marker, Some(CommentMarker::LayerBoundary));
        assert_eq!(tokenize_line(";LAYER_CHANGE").marker, Some(CommentMarker::LayerBoundary));
        assert_eq!(tokenize_line(";LAYER_COUNT:20").marker, None);
    }

    #[test]
    fn parenthesized_comment() {
        let t = tokenize_line("G0 X1 (TYPE:SUPPORT)");
        assert_eq!(t.params, vec![ParamWord::Value { letter: 'X', value: 1.0 }]);
        assert_eq!(t.marker, Some(CommentMarker::FeatureTag("SUPPORT".into())));
    }
}
