//! Integration tests against synthetic toolchain trees, one per release
//! layout.

mod bundles;
mod fixtures;
mod patch_sets;
