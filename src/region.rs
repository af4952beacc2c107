//! Idempotent marked regions.
//!
//! Every inserted block is bracketed by a pair of sentinel comments derived
//! from the patch mark:
//!
//! ```text
//! /*<begin MARK>*/
//! ...content...
//! /*<end MARK>*/
//! ```
//!
//! Re-applying a patch finds the existing pair and rewrites the bracketed
//! block in place, so running the whole pipeline twice is a fixed point.

use crate::edit::{EditError, Splice};
use std::ops::Range;
use thiserror::Error;

/// Begin/end sentinel comments for one mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    mark: String,
    begin: String,
    end: String,
}

impl Sentinels {
    pub fn for_mark(mark: &str) -> Self {
        Self {
            mark: mark.to_string(),
            begin: format!("/*<begin {mark}>*/"),
            end: format!("/*<end {mark}>*/"),
        }
    }

    pub fn mark(&self) -> &str {
        &self.mark
    }

    pub fn begin(&self) -> &str {
        &self.begin
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// The full bracketed block for `body`.
    pub fn block(&self, body: &str) -> String {
        format!("{}\n{}\n{}\n", self.begin, body, self.end)
    }
}

/// How a marked region ended up in the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// No region existed; the block was spliced in at the offset
    Inserted,
    /// An existing region was rewritten with different content
    Replaced,
    /// An existing region already held exactly this block
    Unchanged,
    /// Empty body: nothing inserted, no sentinels written
    Empty,
}

impl RegionOutcome {
    pub fn changed(self) -> bool {
        matches!(self, RegionOutcome::Inserted | RegionOutcome::Replaced)
    }
}

/// Which way a prior region is broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    MissingBegin,
    MissingEnd,
    EndBeforeBegin,
    DuplicateBegin,
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Corruption::MissingBegin => "end sentinel present without begin sentinel",
            Corruption::MissingEnd => "begin sentinel present without end sentinel",
            Corruption::EndBeforeBegin => "end sentinel precedes begin sentinel",
            Corruption::DuplicateBegin => "begin sentinel appears more than once",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("corrupted region for mark '{mark}': {kind}; restore the file from clean source")]
    Corrupted { mark: String, kind: Corruption },

    #[error(transparent)]
    Edit(#[from] EditError),
}

/// Byte range of the existing region for `sentinels`, including the newline
/// that follows the end sentinel.
pub fn find_region(
    content: &str,
    sentinels: &Sentinels,
) -> Result<Option<Range<usize>>, RegionError> {
    let corrupted = |kind| RegionError::Corrupted {
        mark: sentinels.mark.clone(),
        kind,
    };

    let begin = content.find(sentinels.begin());
    let end = content.find(sentinels.end());

    match (begin, end) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(corrupted(Corruption::MissingEnd)),
        (None, Some(_)) => Err(corrupted(Corruption::MissingBegin)),
        (Some(b), Some(e)) => {
            if e < b {
                return Err(corrupted(Corruption::EndBeforeBegin));
            }
            if content[b + sentinels.begin().len()..].contains(sentinels.begin()) {
                return Err(corrupted(Corruption::DuplicateBegin));
            }
            let mut stop = e + sentinels.end().len();
            if content[stop..].starts_with('\n') {
                stop += 1;
            }
            Ok(Some(b..stop))
        }
    }
}

/// Insert `body` at `offset`, or rewrite the existing region in place.
///
/// An empty body is a no-op so patches that produce nothing do not leave
/// empty sentinel pairs behind.
pub fn insert_or_replace(
    content: &str,
    sentinels: &Sentinels,
    offset: usize,
    body: &str,
) -> Result<(String, RegionOutcome), RegionError> {
    if body.is_empty() {
        return Ok((content.to_string(), RegionOutcome::Empty));
    }

    let block = sentinels.block(body);

    match find_region(content, sentinels)? {
        Some(range) => {
            if content[range.clone()] == block {
                return Ok((content.to_string(), RegionOutcome::Unchanged));
            }
            let updated = Splice::replace(range.start, range.end, block).apply_to(content)?;
            Ok((updated, RegionOutcome::Replaced))
        }
        None => {
            let updated = Splice::insert(offset, block).apply_to(content)?;
            Ok((updated, RegionOutcome::Inserted))
        }
    }
}

/// Remove the region for `sentinels`, if present.
pub fn remove_region(content: &str, sentinels: &Sentinels) -> Result<(String, bool), RegionError> {
    match find_region(content, sentinels)? {
        Some(range) => Ok((Splice::replace(range.start, range.end, "").apply_to(content)?, true)),
        None => Ok((content.to_string(), false)),
    }
}

/// Append `line` to a line-oriented list (gitignore style) unless an
/// equivalent line is already present.
///
/// A line matches when it equals `line` after trimming whitespace and any
/// trailing ` # comment`. Returns the new content and whether it changed.
pub fn append_line_once(content: &str, line: &str) -> (String, bool) {
    let wanted = line.trim();
    if content.lines().any(|l| strip_comment(l).trim() == wanted) {
        return (content.to_string(), false);
    }

    let mut out = String::with_capacity(content.len() + line.len() + 2);
    out.push_str(content);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(wanted);
    out.push('\n');
    (out, true)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(0) => "",
        Some(idx) if line[..idx].ends_with(char::is_whitespace) => &line[..idx],
        _ => line,
    }
}
