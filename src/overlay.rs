//! Whole-file overlays: support sources written verbatim into the toolchain.
//!
//! Anchor patches only add call sites; the code they call lives in new files
//! (`src/runtime/xgo_trap.go`, the compiler's `xgo_rewrite_internal`
//! packages) supplied through a [`SourceAssets`] implementation.

use crate::dispatch::VersionPredicate;
use crate::edit::{self, EditError, WriteOutcome};
use crate::region;
use crate::safety::{SafetyError, ToolchainGuard};
use crate::version::GoVersion;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("no embedded asset named '{name}'")]
    UnknownAsset { name: String },

    #[error("failed to read asset {path}: {source}")]
    AssetIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Safety(#[from] SafetyError),
}

/// Supplier of literal support sources.
pub trait SourceAssets {
    fn read_embedded(&self, name: &str) -> Result<Cow<'static, str>, OverlayError>;
}

/// Assets compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

const EMBEDDED: &[(&str, &str)] = &[
    (
        "runtime/xgo_trap.go",
        include_str!("../assets/runtime/xgo_trap.go"),
    ),
    (
        "compiler/record/record.go",
        include_str!("../assets/compiler/record/record.go"),
    ),
    (
        "compiler/syntax/syntax.go",
        include_str!("../assets/compiler/syntax/syntax.go"),
    ),
    (
        "compiler/syntax/options.go",
        include_str!("../assets/compiler/syntax/options.go"),
    ),
    (
        "compiler/patch/patch.go",
        include_str!("../assets/compiler/patch/patch.go"),
    ),
    (
        "compiler/patch/target_decls.go",
        include_str!("../assets/compiler/patch/target_decls.go"),
    ),
    (
        "compiler/patch/target_funcs.go",
        include_str!("../assets/compiler/patch/target_funcs.go"),
    ),
    (
        "compiler/patch/generic.go",
        include_str!("../assets/compiler/patch/generic.go"),
    ),
];

impl EmbeddedAssets {
    pub fn names() -> impl Iterator<Item = &'static str> {
        EMBEDDED.iter().map(|(name, _)| *name)
    }
}

impl SourceAssets for EmbeddedAssets {
    fn read_embedded(&self, name: &str) -> Result<Cow<'static, str>, OverlayError> {
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, src)| Cow::Borrowed(*src))
            .ok_or_else(|| OverlayError::UnknownAsset {
                name: name.to_string(),
            })
    }
}

/// Assets read from a directory with the same layout as the embedded set.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceAssets for DirAssets {
    fn read_embedded(&self, name: &str) -> Result<Cow<'static, str>, OverlayError> {
        let path: PathBuf = name.split('/').fold(self.root.clone(), |p, c| p.join(c));
        if !path.is_file() {
            return Err(OverlayError::UnknownAsset {
                name: name.to_string(),
            });
        }
        fs::read_to_string(&path)
            .map(Cow::Owned)
            .map_err(|source| OverlayError::AssetIo { path, source })
    }
}

/// One file written wholesale into the toolchain.
#[derive(Debug, Clone)]
pub struct OverlayFile {
    /// Slash-separated target under the toolchain root
    pub target: String,
    /// Asset name passed to [`SourceAssets::read_embedded`]
    pub asset: String,
    pub applies_to: VersionPredicate,
}

impl OverlayFile {
    pub fn new(target: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            asset: asset.into(),
            applies_to: VersionPredicate::Any,
        }
    }

    pub fn when(mut self, predicate: VersionPredicate) -> Self {
        self.applies_to = predicate;
        self
    }

    /// Stage the write: resolve the target and load both old and new text.
    pub fn plan(
        &self,
        guard: &ToolchainGuard,
        assets: &dyn SourceAssets,
    ) -> Result<OverlayPlan, OverlayError> {
        let file = guard.resolve(&self.target)?;
        let content = assets.read_embedded(&self.asset)?.into_owned();
        let existing = if file.exists() {
            Some(edit::read_source(&file)?)
        } else {
            None
        };
        Ok(OverlayPlan {
            target: self.target.clone(),
            file,
            existing,
            content,
        })
    }
}

/// A staged overlay write.
#[derive(Debug, Clone)]
pub struct OverlayPlan {
    pub target: String,
    pub file: PathBuf,
    pub existing: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayReport {
    pub target: String,
    pub file: PathBuf,
    pub written: bool,
    pub up_to_date: bool,
}

impl OverlayPlan {
    pub fn up_to_date(&self) -> bool {
        self.existing.as_deref() == Some(self.content.as_str())
    }

    pub fn dry_run(&self) -> OverlayReport {
        OverlayReport {
            target: self.target.clone(),
            file: self.file.clone(),
            written: false,
            up_to_date: self.up_to_date(),
        }
    }

    pub fn commit(&self) -> Result<OverlayReport, OverlayError> {
        let up_to_date = self.up_to_date();
        let written = if up_to_date {
            debug!(file = %self.file.display(), "overlay up to date");
            false
        } else {
            let previous = self.existing.as_deref().unwrap_or("");
            match edit::write_if_changed(&self.file, previous, &self.content)? {
                WriteOutcome::Written { bytes } => {
                    info!(file = %self.file.display(), bytes, "overlay written");
                    true
                }
                WriteOutcome::Unchanged => false,
            }
        };
        Ok(OverlayReport {
            target: self.target.clone(),
            file: self.file.clone(),
            written,
            up_to_date,
        })
    }
}

/// Append each overlay target to `<root>/.gitignore`, once.
///
/// Only an existing `.gitignore` is updated; returns whether it changed.
pub fn ignore_overlays<'a>(
    root: &Path,
    targets: impl IntoIterator<Item = &'a str>,
) -> Result<bool, OverlayError> {
    let path = root.join(".gitignore");
    if !path.is_file() {
        return Ok(false);
    }

    let original = edit::read_source(&path)?;
    let mut content = original.clone();
    for target in targets {
        let (next, _) = region::append_line_once(&content, &format!("/{}", target.trim_start_matches('/')));
        content = next;
    }

    let changed = matches!(
        edit::write_if_changed(&path, &original, &content)?,
        WriteOutcome::Written { .. }
    );
    Ok(changed)
}

/// Write `overlays` applicable to `version` and update `.gitignore`.
pub fn write_overlays(
    guard: &ToolchainGuard,
    overlays: &[OverlayFile],
    assets: &dyn SourceAssets,
    version: &GoVersion,
) -> Result<Vec<OverlayReport>, OverlayError> {
    let plans = overlays
        .iter()
        .filter(|o| o.applies_to.accepts(version))
        .map(|o| o.plan(guard, assets))
        .collect::<Result<Vec<_>, _>>()?;

    let reports = plans
        .iter()
        .map(OverlayPlan::commit)
        .collect::<Result<Vec<_>, _>>()?;

    ignore_overlays(guard.root(), plans.iter().map(|p| p.target.as_str()))?;
    Ok(reports)
}
