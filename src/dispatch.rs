//! Version dispatch: choosing anchor text and content per Go release.
//!
//! The same logical edit needs different anchor literals in different
//! upstream releases. Tables here map minor-version ranges to values and are
//! consulted at runtime, so one binary serves every supported release and
//! every branch is unit-testable.

use crate::version::{parse_requirement, GoVersion, VersionError, MAX_SUPPORTED_MINOR};
use semver::VersionReq;
use std::fmt;

/// An inclusive range of Go 1 minor releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinorRange {
    pub first: u32,
    pub last: u32,
}

impl MinorRange {
    pub const fn exactly(minor: u32) -> Self {
        Self {
            first: minor,
            last: minor,
        }
    }

    pub const fn between(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    /// `first` through the newest supported release.
    pub const fn from(first: u32) -> Self {
        Self {
            first,
            last: MAX_SUPPORTED_MINOR,
        }
    }

    pub fn contains(&self, version: &GoVersion) -> bool {
        version.major == 1 && (self.first..=self.last).contains(&version.minor)
    }
}

impl fmt::Display for MinorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "go1.{}", self.first)
        } else {
            write!(f, "go1.{}-go1.{}", self.first, self.last)
        }
    }
}

/// Ordered map from version ranges to values; first matching range wins.
#[derive(Debug, Clone)]
pub struct VersionTable<T> {
    name: &'static str,
    entries: Vec<(MinorRange, T)>,
}

impl<T> VersionTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, range: MinorRange, value: T) -> Self {
        self.entries.push((range, value));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The value for `version`, or [`VersionError::Unsupported`] naming it.
    pub fn select(&self, version: &GoVersion) -> Result<&T, VersionError> {
        self.entries
            .iter()
            .find(|(range, _)| range.contains(version))
            .map(|(_, value)| value)
            .ok_or(VersionError::Unsupported { version: *version })
    }

    pub fn covers(&self, version: &GoVersion) -> bool {
        self.entries.iter().any(|(range, _)| range.contains(version))
    }

    pub fn ranges(&self) -> impl Iterator<Item = MinorRange> + '_ {
        self.entries.iter().map(|(range, _)| *range)
    }
}

/// Applicability of a single patch to a version.
#[derive(Debug, Clone, Default)]
pub enum VersionPredicate {
    /// Applies to every supported version
    #[default]
    Any,
    /// Applies within a minor range
    Minors(MinorRange),
    /// Applies where a semver requirement matches (`">=1.21"`)
    Requirement(VersionReq),
    /// Arbitrary predicate over the version
    Custom(fn(&GoVersion) -> bool),
}

impl VersionPredicate {
    /// Build from an optional requirement string; `None` or blank means any.
    pub fn from_requirement(requirement: Option<&str>) -> Result<Self, VersionError> {
        match requirement.map(str::trim) {
            None | Some("") => Ok(VersionPredicate::Any),
            Some(req) => Ok(VersionPredicate::Requirement(parse_requirement(req)?)),
        }
    }

    pub fn accepts(&self, version: &GoVersion) -> bool {
        match self {
            VersionPredicate::Any => true,
            VersionPredicate::Minors(range) => range.contains(version),
            VersionPredicate::Requirement(req) => req.matches(&version.to_semver()),
            VersionPredicate::Custom(f) => f(version),
        }
    }
}

impl fmt::Display for VersionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPredicate::Any => f.write_str("all versions"),
            VersionPredicate::Minors(range) => write!(f, "{range}"),
            VersionPredicate::Requirement(req) => write!(f, "{req}"),
            VersionPredicate::Custom(_) => f.write_str("custom predicate"),
        }
    }
}
