use crate::anchor::Placement;
use crate::dispatch::{MinorRange, VersionPredicate};
use crate::region::Sentinels;
use crate::version::GoVersion;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// One logical edit inside one target file.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Unique within its [`FilePatch`]; names the sentinel comments
    pub mark: String,
    /// Literal substrings matched strictly left-to-right
    pub anchors: Vec<String>,
    /// Which anchor the insertion point is relative to
    pub index: usize,
    pub placement: Placement,
    pub content: String,
    pub applies_to: VersionPredicate,
    /// Require the anchor sequence to occur exactly once
    pub unique: bool,
}

impl Patch {
    fn new<I, S>(mark: &str, anchors: I, placement: Placement) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let anchors: Vec<String> = anchors.into_iter().map(Into::into).collect();
        Self {
            mark: mark.to_string(),
            index: anchors.len().saturating_sub(1),
            anchors,
            placement,
            content: String::new(),
            applies_to: VersionPredicate::Any,
            unique: true,
        }
    }

    /// Insert immediately after the last anchor of the sequence.
    pub fn after<I, S>(mark: &str, anchors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(mark, anchors, Placement::After)
    }

    /// Insert at the start of the last anchor of the sequence.
    pub fn before<I, S>(mark: &str, anchors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(mark, anchors, Placement::Before)
    }

    /// Anchor the insertion on the `index`th anchor instead of the last.
    pub fn at(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn when(mut self, predicate: VersionPredicate) -> Self {
        self.applies_to = predicate;
        self
    }

    pub fn only(self, range: MinorRange) -> Self {
        self.when(VersionPredicate::Minors(range))
    }

    pub fn allow_repeats(mut self) -> Self {
        self.unique = false;
        self
    }

    pub fn sentinels(&self) -> Sentinels {
        Sentinels::for_mark(&self.mark)
    }

    pub fn applies_to(&self, version: &GoVersion) -> bool {
        self.applies_to.accepts(version)
    }
}

/// All patches for one file under the toolchain root.
#[derive(Debug, Clone)]
pub struct FilePatch {
    /// Slash-separated path relative to the toolchain root
    pub relative: String,
    pub patches: Vec<Patch>,
}

impl FilePatch {
    pub fn new(relative: impl Into<String>) -> Self {
        Self {
            relative: relative.into(),
            patches: Vec::new(),
        }
    }

    pub fn with(mut self, patch: Patch) -> Self {
        self.patches.push(patch);
        self
    }

    /// Relative path with platform separators.
    pub fn relative_path(&self) -> PathBuf {
        self.relative.split('/').filter(|c| !c.is_empty()).collect()
    }

    /// Patches whose predicate accepts `version`, in declared order.
    pub fn applicable<'a>(&'a self, version: &'a GoVersion) -> impl Iterator<Item = &'a Patch> + 'a {
        self.patches.iter().filter(move |p| p.applies_to(version))
    }

    /// Check every patch before any file is touched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.relative.trim().is_empty() {
            issues.push(ValidationIssue::EmptyPath);
        }
        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();

        for (index, patch) in self.patches.iter().enumerate() {
            let mark = (!patch.mark.trim().is_empty()).then(|| patch.mark.clone());

            match &mark {
                None => issues.push(ValidationIssue::MissingField {
                    index,
                    mark: None,
                    field: "mark",
                }),
                Some(m) => {
                    if m.contains("*/") {
                        issues.push(ValidationIssue::InvalidMark {
                            index,
                            mark: m.clone(),
                            reason: "must not contain '*/'",
                        });
                    }
                    if m.contains('\n') || m.contains('\r') {
                        issues.push(ValidationIssue::InvalidMark {
                            index,
                            mark: m.clone(),
                            reason: "must be a single line",
                        });
                    }
                    let first = *seen.entry(patch.mark.as_str()).or_insert(index);
                    if first != index {
                        issues.push(ValidationIssue::DuplicateMark {
                            index,
                            mark: m.clone(),
                            first,
                        });
                    }
                }
            }

            if patch.anchors.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    index,
                    mark: mark.clone(),
                    field: "anchors",
                });
            } else if patch.index >= patch.anchors.len() {
                issues.push(ValidationIssue::AnchorIndexOutOfRange {
                    index,
                    mark: mark.clone(),
                    anchor_index: patch.index,
                    len: patch.anchors.len(),
                });
            }

            for (anchor, text) in patch.anchors.iter().enumerate() {
                if text.is_empty() {
                    issues.push(ValidationIssue::EmptyAnchor {
                        index,
                        mark: mark.clone(),
                        anchor,
                    });
                }
            }

            if patch.content.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    index,
                    mark: mark.clone(),
                    field: "content",
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                file: self.relative.clone(),
                issues,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub file: String,
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {issue}", self.file)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyPath,
    EmptyPatchList,
    MissingField {
        index: usize,
        mark: Option<String>,
        field: &'static str,
    },
    EmptyAnchor {
        index: usize,
        mark: Option<String>,
        anchor: usize,
    },
    AnchorIndexOutOfRange {
        index: usize,
        mark: Option<String>,
        anchor_index: usize,
        len: usize,
    },
    DuplicateMark {
        index: usize,
        mark: String,
        first: usize,
    },
    InvalidMark {
        index: usize,
        mark: String,
        reason: &'static str,
    },
}

struct PatchLabel<'a>(usize, Option<&'a str>);

impl fmt::Display for PatchLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Some(mark) => write!(f, "patch #{} '{}'", self.0, mark),
            None => write!(f, "patch #{}", self.0),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPath => write!(f, "file patch has an empty path"),
            ValidationIssue::EmptyPatchList => write!(f, "file patch contains no patches"),
            ValidationIssue::MissingField { index, mark, field } => write!(
                f,
                "{} missing required field '{field}'",
                PatchLabel(*index, mark.as_deref())
            ),
            ValidationIssue::EmptyAnchor {
                index,
                mark,
                anchor,
            } => write!(
                f,
                "{} has empty anchor #{anchor}",
                PatchLabel(*index, mark.as_deref())
            ),
            ValidationIssue::AnchorIndexOutOfRange {
                index,
                mark,
                anchor_index,
                len,
            } => write!(
                f,
                "{} anchors on #{anchor_index} but has only {len} anchors",
                PatchLabel(*index, mark.as_deref())
            ),
            ValidationIssue::DuplicateMark { index, mark, first } => write!(
                f,
                "{} reuses the mark of patch #{first}",
                PatchLabel(*index, Some(mark))
            ),
            ValidationIssue::InvalidMark {
                index,
                mark,
                reason,
            } => write!(
                f,
                "{} has an invalid mark: {reason}",
                PatchLabel(*index, Some(mark))
            ),
        }
    }
}
