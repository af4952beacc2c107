use thiserror::Error;

/// The existing line that most resembles a missing anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosestLine {
    /// 1-based line number in the searched content
    pub line: usize,
    pub text: String,
    /// Normalized Levenshtein similarity in [0, 1]
    pub similarity: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnchorError {
    #[error(
        "anchor sequence {anchors:?} not found: anchor #{missing} {:?} is missing{}",
        missing_anchor(.anchors, .missing),
        closest_hint(.closest)
    )]
    NotFound {
        anchors: Vec<String>,
        /// Index of the first anchor that could not be found
        missing: usize,
        closest: Option<ClosestLine>,
    },

    #[error(
        "anchor sequence {anchors:?} is ambiguous: matched at byte {first} and again at byte {second}; narrow the anchors"
    )]
    Ambiguous {
        anchors: Vec<String>,
        first: usize,
        second: usize,
    },

    #[error("anchor index {index} out of range for {len} anchors")]
    IndexOutOfRange { index: usize, len: usize },
}

fn missing_anchor<'a>(anchors: &'a [String], missing: &usize) -> &'a str {
    anchors.get(*missing).map(String::as_str).unwrap_or("")
}

fn closest_hint(closest: &Option<ClosestLine>) -> String {
    match closest {
        Some(c) => format!(" (closest line {}: {:?})", c.line, c.text),
        None => String::new(),
    }
}
