//! Patch bundles: the file patches and overlays applied as one unit.
//!
//! A bundle is planned completely in memory before anything is written. If
//! any file fails to validate, locate or splice, the toolchain tree is left
//! exactly as it was.

pub mod compiler;
pub mod runtime;

use crate::overlay::{self, OverlayFile, OverlayPlan, OverlayReport, SourceAssets};
use crate::patch::{
    ApplicationError, ConfigError, FilePatch, FilePlan, FileReport, PatchOutcome, PatchSet,
    ValidationError,
};
use crate::safety::ToolchainGuard;
use crate::version::{GoVersion, VersionError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    Compiler,
    Runtime,
}

impl BundleKind {
    pub const ALL: [BundleKind; 2] = [BundleKind::Runtime, BundleKind::Compiler];

    pub fn name(self) -> &'static str {
        match self {
            BundleKind::Compiler => "compiler",
            BundleKind::Runtime => "runtime",
        }
    }

    pub fn bundle(self, version: &GoVersion) -> Result<Bundle, VersionError> {
        match self {
            BundleKind::Compiler => compiler::bundle(version),
            BundleKind::Runtime => runtime::bundle(version),
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BundleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compiler" => Ok(BundleKind::Compiler),
            "runtime" => Ok(BundleKind::Runtime),
            other => Err(format!("unknown bundle '{other}' (expected compiler or runtime)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub name: String,
    pub files: Vec<FilePatch>,
    pub overlays: Vec<OverlayFile>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
            overlays: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: FilePatch) -> Self {
        self.add_file(file);
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayFile) -> Self {
        self.overlays.push(overlay);
        self
    }

    /// Add patches for a file, folding them into an existing entry for the
    /// same path so the file is still read and written once.
    pub fn add_file(&mut self, file: FilePatch) {
        match self.files.iter_mut().find(|f| f.relative == file.relative) {
            Some(existing) => existing.patches.extend(file.patches),
            None => self.files.push(file),
        }
    }

    /// Merge another bundle into this one.
    pub fn merge(mut self, other: Bundle) -> Self {
        for file in other.files {
            self.add_file(file);
        }
        self.overlays.extend(other.overlays);
        self
    }

    /// Bundle for a user patch set.
    pub fn from_patch_set(set: &PatchSet) -> Result<Self, ConfigError> {
        let name = if set.meta.name.is_empty() {
            "patch-set".to_string()
        } else {
            set.meta.name.clone()
        };
        let mut bundle = Bundle::new(name);
        for file in set.to_file_patches()? {
            bundle.add_file(file);
        }
        Ok(bundle)
    }

    /// The built-in bundles selected by `kinds`, merged in order.
    pub fn builtin(kinds: &[BundleKind], version: &GoVersion) -> Result<Self, VersionError> {
        let name = kinds.iter().map(|k| k.name()).collect::<Vec<_>>().join("+");
        kinds
            .iter()
            .try_fold(Bundle::new(name), |acc, kind| Ok(acc.merge(kind.bundle(version)?)))
    }

    /// Validate every file patch; all problems are reported together.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = self
            .files
            .iter()
            .filter_map(|f| f.validate().err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Plan every file and overlay without writing.
    pub fn plan(
        &self,
        guard: &ToolchainGuard,
        version: &GoVersion,
        assets: &dyn SourceAssets,
    ) -> Result<BundlePlan, ApplicationError> {
        version.ensure_supported()?;
        for file in &self.files {
            file.validate()?;
        }

        let files = self
            .files
            .iter()
            .map(|f| f.plan(guard, version))
            .collect::<Result<Vec<_>, _>>()?;

        let overlays = self
            .overlays
            .iter()
            .filter(|o| o.applies_to.accepts(version))
            .map(|o| o.plan(guard, assets))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BundlePlan {
            name: self.name.clone(),
            files,
            overlays,
        })
    }

    /// Plan, then write everything that changed.
    pub fn apply_all(
        &self,
        root: &Path,
        version: &GoVersion,
        assets: &dyn SourceAssets,
    ) -> Result<BundleReport, ApplicationError> {
        let guard = ToolchainGuard::new(root)?;
        let plan = self.plan(&guard, version, assets)?;
        plan.commit(&guard)
    }

    /// Plan only; nothing is written.
    pub fn check(
        &self,
        root: &Path,
        version: &GoVersion,
        assets: &dyn SourceAssets,
    ) -> Result<BundleReport, ApplicationError> {
        let guard = ToolchainGuard::new(root)?;
        Ok(self.plan(&guard, version, assets)?.dry_run())
    }
}

#[derive(Debug, Clone)]
pub struct BundlePlan {
    pub name: String,
    pub files: Vec<FilePlan>,
    pub overlays: Vec<OverlayPlan>,
}

impl BundlePlan {
    pub fn dry_run(&self) -> BundleReport {
        BundleReport {
            name: self.name.clone(),
            files: self.files.iter().map(FilePlan::dry_run).collect(),
            overlays: self.overlays.iter().map(OverlayPlan::dry_run).collect(),
        }
    }

    pub fn commit(&self, guard: &ToolchainGuard) -> Result<BundleReport, ApplicationError> {
        let mut files = Vec::with_capacity(self.files.len());
        for plan in &self.files {
            let report = plan.commit()?;
            if report.untouched() {
                warn!(file = %report.file.display(), "no patch applies to this version, skipped");
            }
            files.push(report);
        }

        let overlays = self
            .overlays
            .iter()
            .map(OverlayPlan::commit)
            .collect::<Result<Vec<_>, _>>()?;
        overlay::ignore_overlays(guard.root(), self.overlays.iter().map(|o| o.target.as_str()))?;

        let report = BundleReport {
            name: self.name.clone(),
            files,
            overlays,
        };
        info!(
            bundle = %report.name,
            written = report.written(),
            "bundle applied"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReport {
    pub name: String,
    pub files: Vec<FileReport>,
    pub overlays: Vec<OverlayReport>,
}

impl BundleReport {
    /// Number of files (patched or overlaid) actually rewritten.
    pub fn written(&self) -> usize {
        self.files.iter().filter(|f| f.written).count()
            + self.overlays.iter().filter(|o| o.written).count()
    }

    pub fn count(&self, outcome: PatchOutcome) -> usize {
        self.files.iter().map(|f| f.count(outcome)).sum()
    }

    /// Every applicable patch is present and every overlay is current.
    pub fn fully_applied(&self) -> bool {
        self.count(PatchOutcome::Inserted) == 0
            && self.count(PatchOutcome::Replaced) == 0
            && self.overlays.iter().all(|o| o.up_to_date)
    }
}
