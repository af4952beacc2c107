//! Anchor location in foreign source text.
//!
//! Patch targets are files from an independently evolving upstream, so
//! insertion points are found by literal multi-token sequences rather than by
//! parsing. A missing or repeated sequence is a hard error that names the
//! anchors, so a maintainer can diff against the new upstream and re-anchor.

pub mod errors;
pub mod locator;

pub use errors::{AnchorError, ClosestLine};
pub use locator::{closest_line, locate, locate_unique, AnchorMatch, Locator, Placement, TextLocator};
