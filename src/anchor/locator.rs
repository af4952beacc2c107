use crate::anchor::errors::{AnchorError, ClosestLine};

/// Below this similarity a "closest line" hint is noise and is dropped.
const MIN_HINT_SIMILARITY: f64 = 0.5;

/// Where the insertion point sits relative to the designated anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// At the start of the anchor's match
    Before,
    /// Immediately after the anchor's match
    #[default]
    After,
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Placement::Before => "before",
            Placement::After => "after",
        })
    }
}

/// A located insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorMatch {
    /// Insertion offset (start or end of the designated anchor)
    pub offset: usize,
    /// Byte length of the designated anchor
    pub anchor_len: usize,
    /// Offset just past the last anchor in the sequence
    pub end: usize,
}

impl AnchorMatch {
    fn shifted(self, by: usize) -> Self {
        Self {
            offset: self.offset + by,
            anchor_len: self.anchor_len,
            end: self.end + by,
        }
    }
}

/// Strategy for finding an anchor sequence in foreign source text.
///
/// Implementations return `None` when the sequence is absent; uniqueness and
/// error reporting are layered on top by [`locate_unique`].
pub trait Locator {
    fn locate(
        &self,
        content: &str,
        anchors: &[String],
        index: usize,
        placement: Placement,
    ) -> Option<AnchorMatch>;

    /// Index of the first anchor that cannot be found in order, if any.
    fn first_missing(&self, content: &str, anchors: &[String]) -> Option<usize>;
}

/// Literal substring locator.
///
/// Each anchor is searched only in the text after the previous anchor's
/// match, so a sequence matches strictly left-to-right without overlap.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLocator;

impl Locator for TextLocator {
    fn locate(
        &self,
        content: &str,
        anchors: &[String],
        index: usize,
        placement: Placement,
    ) -> Option<AnchorMatch> {
        let mut cursor = 0;
        let mut hit = None;

        for (k, anchor) in anchors.iter().enumerate() {
            let start = cursor + content[cursor..].find(anchor.as_str())?;
            let end = start + anchor.len();
            if k == index {
                let offset = match placement {
                    Placement::Before => start,
                    Placement::After => end,
                };
                hit = Some((offset, anchor.len()));
            }
            cursor = end;
        }

        hit.map(|(offset, anchor_len)| AnchorMatch {
            offset,
            anchor_len,
            end: cursor,
        })
    }

    fn first_missing(&self, content: &str, anchors: &[String]) -> Option<usize> {
        let mut cursor = 0;
        for (k, anchor) in anchors.iter().enumerate() {
            match content[cursor..].find(anchor.as_str()) {
                Some(rel) => cursor += rel + anchor.len(),
                None => return Some(k),
            }
        }
        None
    }
}

/// Locate an anchor sequence, turning absence into a descriptive error.
pub fn locate<L: Locator + ?Sized>(
    locator: &L,
    content: &str,
    anchors: &[String],
    index: usize,
    placement: Placement,
) -> Result<AnchorMatch, AnchorError> {
    if index >= anchors.len() {
        return Err(AnchorError::IndexOutOfRange {
            index,
            len: anchors.len(),
        });
    }

    locator
        .locate(content, anchors, index, placement)
        .ok_or_else(|| {
            let missing = locator.first_missing(content, anchors).unwrap_or(0);
            AnchorError::NotFound {
                anchors: anchors.to_vec(),
                missing,
                closest: closest_line(content, &anchors[missing]),
            }
        })
}

/// Locate an anchor sequence that must occur exactly once.
///
/// After the first match, the whole sequence is searched again in the text
/// following the first match's consumed end; a second hit is an ambiguity.
pub fn locate_unique<L: Locator + ?Sized>(
    locator: &L,
    content: &str,
    anchors: &[String],
    index: usize,
    placement: Placement,
) -> Result<AnchorMatch, AnchorError> {
    let first = locate(locator, content, anchors, index, placement)?;

    if let Some(second) = locator.locate(&content[first.end..], anchors, index, placement) {
        let second = second.shifted(first.end);
        return Err(AnchorError::Ambiguous {
            anchors: anchors.to_vec(),
            first: first.offset,
            second: second.offset,
        });
    }

    Ok(first)
}

/// Find the line most similar to `anchor`, to point a maintainer at what
/// upstream renamed.
pub fn closest_line(content: &str, anchor: &str) -> Option<ClosestLine> {
    let needle = anchor.trim();
    if needle.is_empty() {
        return None;
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let similarity = strsim::normalized_levenshtein(line.trim(), needle);
            ClosestLine {
                line: idx + 1,
                text: line.trim().to_string(),
                similarity,
            }
        })
        .filter(|c| c.similarity >= MIN_HINT_SIMILARITY)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_locate_after_last_anchor() {
        let content = "func a() {\n\tx := 1\n}\n";
        let m = TextLocator
            .locate(content, &seq(&["func a() {", "\n"]), 1, Placement::After)
            .unwrap();
        assert_eq!(&content[..m.offset], "func a() {\n");
        assert_eq!(m.anchor_len, 1);
        assert_eq!(m.end, m.offset);
    }

    #[test]
    fn test_locate_before_designated_anchor() {
        let content = "gp := getg()\n\tsystemstack(func() {\n";
        let m = TextLocator
            .locate(
                content,
                &seq(&["gp := getg()", "systemstack(func() {"]),
                1,
                Placement::Before,
            )
            .unwrap();
        assert!(content[m.offset..].starts_with("systemstack"));
        assert_eq!(m.end, content.len() - 1);
    }

    #[test]
    fn test_anchors_are_searched_in_order() {
        // "b" occurs before "a" but the sequence requires a then b
        let content = "b\na\n";
        assert!(TextLocator
            .locate(content, &seq(&["a", "b"]), 1, Placement::After)
            .is_none());
        assert_eq!(TextLocator.first_missing(content, &seq(&["a", "b"])), Some(1));
    }

    #[test]
    fn test_anchors_do_not_overlap() {
        // second "ab" must start after the first one ends
        let content = "xab";
        assert!(TextLocator
            .locate(content, &seq(&["ab", "b"]), 0, Placement::After)
            .is_none());
    }

    #[test]
    fn test_locate_reports_missing_anchor() {
        let err = locate(
            &TextLocator,
            "func newproc(fn *funcval) {\n",
            &seq(&["func newproc(fn *funcval) {", "systemstack("]),
            1,
            Placement::Before,
        )
        .unwrap_err();
        match err {
            AnchorError::NotFound { missing, .. } => assert_eq!(missing, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_found_carries_closest_line_hint() {
        let content = "package runtime\n\nfunc newproc(fn *funcval) {\n}\n";
        let err = locate(
            &TextLocator,
            content,
            &seq(&["func newproc(siz int32, fn *funcval) {"]),
            0,
            Placement::After,
        )
        .unwrap_err();
        match err {
            AnchorError::NotFound { closest, .. } => {
                let closest = closest.expect("expected a hint");
                assert_eq!(closest.line, 3);
                assert_eq!(closest.text, "func newproc(fn *funcval) {");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_locate_unique_detects_ambiguity() {
        let content = "X\nfoo\nX\nfoo\n";
        let err = locate_unique(
            &TextLocator,
            content,
            &seq(&["X", "foo"]),
            1,
            Placement::After,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AnchorError::Ambiguous {
                anchors: seq(&["X", "foo"]),
                first: 5,
                second: 11,
            }
        );
    }

    #[test]
    fn test_locate_unique_accepts_single_match() {
        let content = "X\nfoo\nX\n";
        let m = locate_unique(
            &TextLocator,
            content,
            &seq(&["X", "foo"]),
            1,
            Placement::After,
        )
        .unwrap();
        assert_eq!(m.offset, 5);
    }

    #[test]
    fn test_index_out_of_range() {
        let err = locate(&TextLocator, "abc", &seq(&["a"]), 3, Placement::After).unwrap_err();
        assert_eq!(err, AnchorError::IndexOutOfRange { index: 3, len: 1 });
    }

    #[test]
    fn test_not_found_message_names_anchor() {
        let err = locate(&TextLocator, "abc", &seq(&["zzz"]), 0, Placement::After).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"zzz\""), "{msg}");
        assert!(msg.contains("anchor #0"), "{msg}");
    }
}
