//! Patch applicator - applies file patch descriptors with idempotency checks
//!
//! For one target file this:
//! - Validates every patch before any I/O
//! - Filters patches by their version predicate
//! - Reads the file once and applies patches in declared order, each seeing
//!   the edits of the ones before it
//! - Writes back only when the content actually changed

use crate::anchor::{locate, locate_unique, AnchorError, Locator, TextLocator};
use crate::edit::{self, EditError, WriteOutcome};
use crate::overlay::OverlayError;
use crate::patch::schema::{FilePatch, ValidationError};
use crate::region::{self, RegionError, RegionOutcome};
use crate::safety::{SafetyError, ToolchainGuard};
use crate::version::{GoVersion, VersionError};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of one patch within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Region was inserted fresh
    Inserted,
    /// Existing region was rewritten with new content
    Replaced,
    /// Region already held this content
    AlreadyApplied,
    /// Version predicate rejected the patch
    SkippedVersion,
}

impl PatchOutcome {
    pub fn changed(self) -> bool {
        matches!(self, PatchOutcome::Inserted | PatchOutcome::Replaced)
    }
}

impl From<RegionOutcome> for PatchOutcome {
    fn from(outcome: RegionOutcome) -> Self {
        match outcome {
            RegionOutcome::Inserted => PatchOutcome::Inserted,
            RegionOutcome::Replaced => PatchOutcome::Replaced,
            // empty content is rejected by validation before it gets here
            RegionOutcome::Unchanged | RegionOutcome::Empty => PatchOutcome::AlreadyApplied,
        }
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PatchOutcome::Inserted => "inserted",
            PatchOutcome::Replaced => "replaced",
            PatchOutcome::AlreadyApplied => "already applied",
            PatchOutcome::SkippedVersion => "skipped (version)",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub mark: String,
    pub outcome: PatchOutcome,
}

/// Result of patching one file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "FileReport should be checked for what changed"]
pub struct FileReport {
    pub file: PathBuf,
    pub patches: Vec<PatchReport>,
    /// Whether the patched content differs from what was on disk
    pub changed: bool,
    /// Whether the file was actually rewritten
    pub written: bool,
    /// xxh3 of the content before and after; `None` when the file was not read
    pub digest_before: Option<u64>,
    pub digest_after: Option<u64>,
}

impl FileReport {
    /// No patch applied to this version, so the file was never read.
    pub fn untouched(&self) -> bool {
        self.digest_before.is_none()
    }

    pub fn count(&self, outcome: PatchOutcome) -> usize {
        self.patches.iter().filter(|p| p.outcome == outcome).count()
    }
}

/// A file patched in memory, not yet written.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub file: PathBuf,
    pub original: Option<String>,
    pub updated: Option<String>,
    pub patches: Vec<PatchReport>,
}

impl FilePlan {
    pub fn changed(&self) -> bool {
        self.original != self.updated
    }

    fn report(&self, written: bool) -> FileReport {
        FileReport {
            file: self.file.clone(),
            patches: self.patches.clone(),
            changed: self.changed(),
            written,
            digest_before: self.original.as_deref().map(edit::digest),
            digest_after: self.updated.as_deref().map(edit::digest),
        }
    }

    /// Report without writing.
    pub fn dry_run(&self) -> FileReport {
        self.report(false)
    }

    /// Write the planned content if it changed.
    pub fn commit(&self) -> Result<FileReport, ApplicationError> {
        let (Some(original), Some(updated)) = (&self.original, &self.updated) else {
            return Ok(self.report(false));
        };

        let written = match edit::write_if_changed(&self.file, original, updated)? {
            WriteOutcome::Written { bytes } => {
                info!(file = %self.file.display(), bytes, "patched file written");
                true
            }
            WriteOutcome::Unchanged => false,
        };
        Ok(self.report(written))
    }
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// Patch descriptor failed validation; nothing was touched
    Validation(ValidationError),
    /// Version is outside the supported range
    Version(VersionError),
    /// Anchor sequence missing or ambiguous
    Anchor {
        file: PathBuf,
        mark: String,
        source: AnchorError,
    },
    /// Prior region is corrupted or the splice was invalid
    Region {
        file: PathBuf,
        mark: String,
        source: RegionError,
    },
    /// File I/O error
    Edit(EditError),
    /// Target escapes the toolchain source tree
    Safety(SafetyError),
    /// Whole-file overlay could not be staged or written
    Overlay(OverlayError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Validation(e) => write!(f, "invalid patch descriptor: {}", e),
            ApplicationError::Version(e) => write!(f, "version error: {}", e),
            ApplicationError::Anchor { file, mark, source } => {
                write!(f, "{} [{}]: {}", file.display(), mark, source)
            }
            ApplicationError::Region { file, mark, source } => {
                write!(f, "{} [{}]: {}", file.display(), mark, source)
            }
            ApplicationError::Edit(e) => write!(f, "{}", e),
            ApplicationError::Safety(e) => write!(f, "unsafe patch target: {}", e),
            ApplicationError::Overlay(e) => write!(f, "overlay failed: {}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Validation(e) => Some(e),
            ApplicationError::Version(e) => Some(e),
            ApplicationError::Anchor { source, .. } => Some(source),
            ApplicationError::Region { source, .. } => Some(source),
            ApplicationError::Edit(e) => Some(e),
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Overlay(e) => Some(e),
        }
    }
}

impl From<ValidationError> for ApplicationError {
    fn from(e: ValidationError) -> Self {
        ApplicationError::Validation(e)
    }
}

impl From<VersionError> for ApplicationError {
    fn from(e: VersionError) -> Self {
        ApplicationError::Version(e)
    }
}

impl From<EditError> for ApplicationError {
    fn from(e: EditError) -> Self {
        ApplicationError::Edit(e)
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

impl From<OverlayError> for ApplicationError {
    fn from(e: OverlayError) -> Self {
        ApplicationError::Overlay(e)
    }
}

impl FilePatch {
    /// Apply to in-memory content with the literal text locator.
    pub fn apply_str(
        &self,
        content: &str,
        version: &GoVersion,
    ) -> Result<(String, Vec<PatchReport>), ApplicationError> {
        self.apply_str_with(&TextLocator, content, version)
    }

    /// Apply to in-memory content with a caller-chosen locator.
    pub fn apply_str_with<L: Locator + ?Sized>(
        &self,
        locator: &L,
        content: &str,
        version: &GoVersion,
    ) -> Result<(String, Vec<PatchReport>), ApplicationError> {
        self.validate()?;

        let file = PathBuf::from(&self.relative);
        let mut current = content.to_string();
        let mut reports = Vec::with_capacity(self.patches.len());

        for patch in &self.patches {
            if !patch.applies_to(version) {
                debug!(file = %self.relative, mark = %patch.mark, %version, "patch not applicable");
                reports.push(PatchReport {
                    mark: patch.mark.clone(),
                    outcome: PatchOutcome::SkippedVersion,
                });
                continue;
            }

            let sentinels = patch.sentinels();
            let region_error = |source| ApplicationError::Region {
                file: file.clone(),
                mark: patch.mark.clone(),
                source,
            };

            // an existing region is rewritten where it stands; its body may
            // repeat the anchors, so locating again could turn ambiguous
            let offset = match region::find_region(&current, &sentinels).map_err(region_error)? {
                Some(range) => range.start,
                None => {
                    let located = if patch.unique {
                        locate_unique(locator, &current, &patch.anchors, patch.index, patch.placement)
                    } else {
                        locate(locator, &current, &patch.anchors, patch.index, patch.placement)
                    }
                    .map_err(|source| ApplicationError::Anchor {
                        file: file.clone(),
                        mark: patch.mark.clone(),
                        source,
                    })?;
                    located.offset
                }
            };

            let (next, outcome) =
                region::insert_or_replace(&current, &sentinels, offset, &patch.content).map_err(region_error)?;

            debug!(
                file = %self.relative,
                mark = %patch.mark,
                offset,
                ?outcome,
                "patch located"
            );

            reports.push(PatchReport {
                mark: patch.mark.clone(),
                outcome: outcome.into(),
            });
            current = next;
        }

        Ok((current, reports))
    }

    /// Validate, read and patch in memory without writing.
    ///
    /// A file with no patch applicable to `version` is not read at all, so
    /// files that only exist in some releases can be listed unconditionally.
    pub fn plan(&self, guard: &ToolchainGuard, version: &GoVersion) -> Result<FilePlan, ApplicationError> {
        self.validate()?;
        version.ensure_supported()?;

        let file = guard.resolve(&self.relative)?;

        if self.applicable(version).next().is_none() {
            let patches = self
                .patches
                .iter()
                .map(|p| PatchReport {
                    mark: p.mark.clone(),
                    outcome: PatchOutcome::SkippedVersion,
                })
                .collect();
            return Ok(FilePlan {
                file,
                original: None,
                updated: None,
                patches,
            });
        }

        let original = edit::read_source(&file)?;
        let (updated, patches) = self.apply_str(&original, version)?;

        Ok(FilePlan {
            file,
            original: Some(original),
            updated: Some(updated),
            patches,
        })
    }

    /// Apply all applicable patches to `<root>/<relative>`.
    pub fn apply(&self, root: &Path, version: &GoVersion) -> Result<FileReport, ApplicationError> {
        let guard = ToolchainGuard::new(root)?;
        self.plan(&guard, version)?.commit()
    }

    /// Same as [`FilePatch::apply`] but never writes.
    pub fn check(&self, root: &Path, version: &GoVersion) -> Result<FileReport, ApplicationError> {
        let guard = ToolchainGuard::new(root)?;
        Ok(self.plan(&guard, version)?.dry_run())
    }
}
