//! Goroot Patcher: weaves trap hooks into a Go toolchain's own sources
//!
//! Every modification is a sentinel-delimited region placed relative to an
//! ordered sequence of text anchors. Applying a patch a second time finds the
//! existing region and rewrites it in place, so re-running against an
//! already-patched tree is a no-op.
//!
//! # Architecture
//!
//! - [`anchor`] finds the insertion offset for an anchor sequence
//! - [`region`] inserts, replaces, and removes marked regions
//! - [`patch`] describes file patches and applies them per file
//! - [`dispatch`] selects version-specific values by Go minor version
//! - [`bundle`] groups the built-in compiler and runtime patches
//! - [`overlay`] writes whole new source files next to the patched ones
//! - [`rules`] decides which functions get a trap
//! - [`hooks`] models the runtime side of the injected hooks
//!
//! # Safety
//!
//! - Writes are atomic (tempfile + fsync + rename) and skipped when the
//!   content is unchanged, preserving mtimes
//! - Targets are confined to `<GOROOT>/src`
//! - A bundle is planned in full before the first write
//!
//! # Example
//!
//! ```no_run
//! use goroot_patcher::{Bundle, BundleKind, EmbeddedAssets, GoVersion};
//! use std::path::Path;
//!
//! let version: GoVersion = "go1.22.4".parse()?;
//! let bundle = Bundle::builtin(&BundleKind::ALL, &version)?;
//! let report = bundle.apply_all(Path::new("/opt/go"), &version, &EmbeddedAssets)?;
//! println!("{} files written", report.written());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod anchor;
pub mod bundle;
pub mod dispatch;
pub mod edit;
pub mod hooks;
pub mod overlay;
pub mod patch;
pub mod region;
pub mod rules;
pub mod safety;
pub mod toolchain;
pub mod version;

// Re-exports
pub use anchor::{AnchorError, Locator, Placement, TextLocator};
pub use bundle::{Bundle, BundleKind, BundlePlan, BundleReport};
pub use dispatch::{MinorRange, VersionPredicate, VersionTable};
pub use edit::{EditError, Splice, WriteOutcome};
pub use overlay::{DirAssets, EmbeddedAssets, OverlayError, OverlayFile, SourceAssets};
pub use patch::{
    load_dir, load_from_path, load_from_str, ApplicationError, ConfigError, FilePatch, FileReport,
    Patch, PatchOutcome, PatchSet, ValidationError,
};
pub use region::{RegionError, RegionOutcome, Sentinels};
pub use rules::{Rule, RuleError, RuleSet};
pub use safety::{SafetyError, ToolchainGuard};
pub use toolchain::{Toolchain, ToolchainError};
pub use version::{matches_requirement, GoVersion, VersionError};
