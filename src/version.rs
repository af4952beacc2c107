//! Go toolchain versions and requirement matching.
//!
//! Versions come from the toolchain's own `go version` output
//! (`go version go1.21.3 linux/amd64`) and are compared against semver
//! requirement strings like `">=1.18, <1.20"`.

use semver::{Version, VersionReq};
use std::fmt;
use std::str::FromStr;

/// Oldest supported minor release of Go 1.
pub const MIN_SUPPORTED_MINOR: u32 = 17;
/// Newest supported minor release of Go 1.
pub const MAX_SUPPORTED_MINOR: u32 = 26;

/// A `(major, minor, patch)` Go release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Parsed `go version` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionOutput {
    pub version: GoVersion,
    pub goos: String,
    pub goarch: String,
}

/// Errors during version parsing and filtering
#[derive(Debug, Clone)]
pub enum VersionError {
    /// `go version` output or version tag does not have the expected shape
    InvalidVersion { value: String, reason: String },
    /// Invalid version requirement (e.g., ">=bad")
    InvalidRequirement { value: String, source: String },
    /// Version outside the range the patch tables cover
    Unsupported { version: GoVersion },
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::InvalidVersion { value, reason } => {
                write!(f, "invalid go version '{}': {}", value, reason)
            }
            VersionError::InvalidRequirement { value, source } => {
                write!(f, "invalid version requirement '{}': {}", value, source)
            }
            VersionError::Unsupported { version } => write!(
                f,
                "unsupported go version {}: supported range is go1.{} through go1.{}",
                version, MIN_SUPPORTED_MINOR, MAX_SUPPORTED_MINOR
            ),
        }
    }
}

impl std::error::Error for VersionError {}

impl GoVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a release tag like `go1.21.3` or `go1.20`.
    ///
    /// Pre-releases (`go1.22rc1`) and development builds (`devel ...`) are
    /// rejected: the patch tables only describe released sources.
    pub fn parse_tag(tag: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersion {
            value: tag.to_string(),
            reason: reason.to_string(),
        };

        let rest = tag
            .strip_prefix("go")
            .ok_or_else(|| invalid("expected 'go' prefix"))?;

        let parts: Vec<&str> = rest.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected go<major>.<minor>[.<patch>]"));
        }

        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("version components must be decimal numbers"));
            }
            *slot = part
                .parse()
                .map_err(|_| invalid("version component out of range"))?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2]))
    }

    /// Parse `go version go1.21.3 linux/amd64`, positionally.
    pub fn parse_output(output: &str) -> Result<VersionOutput, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersion {
            value: output.trim().to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = output.split_whitespace().collect();
        if fields.len() != 4 || fields[0] != "go" || fields[1] != "version" {
            return Err(invalid("expected 'go version go<major>.<minor>.<patch> <os>/<arch>'"));
        }

        let version = Self::parse_tag(fields[2])?;
        let (goos, goarch) = fields[3]
            .split_once('/')
            .filter(|(os, arch)| !os.is_empty() && !arch.is_empty())
            .ok_or_else(|| invalid("expected <os>/<arch> as last field"))?;

        Ok(VersionOutput {
            version,
            goos: goos.to_string(),
            goarch: goarch.to_string(),
        })
    }

    pub fn to_semver(&self) -> Version {
        Version::new(self.major as u64, self.minor as u64, self.patch as u64)
    }

    /// Whether this version is covered by the patch tables.
    pub fn is_supported(&self) -> bool {
        self.major == 1 && (MIN_SUPPORTED_MINOR..=MAX_SUPPORTED_MINOR).contains(&self.minor)
    }

    /// Fail with [`VersionError::Unsupported`] outside the supported range.
    pub fn ensure_supported(&self) -> Result<(), VersionError> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(VersionError::Unsupported { version: *self })
        }
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "go{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for GoVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("go version ") {
            Self::parse_output(s).map(|out| out.version)
        } else {
            Self::parse_tag(s)
        }
    }
}

/// Parse a semver requirement, keeping the offending text on error.
pub fn parse_requirement(requirement: &str) -> Result<VersionReq, VersionError> {
    VersionReq::parse(requirement.trim()).map_err(|e| VersionError::InvalidRequirement {
        value: requirement.to_string(),
        source: e.to_string(),
    })
}

/// Check if a version matches a requirement string
///
/// # Examples
///
/// ```
/// use goroot_patcher::version::{matches_requirement, GoVersion};
///
/// let v = GoVersion::new(1, 21, 3);
/// assert!(matches_requirement(&v, Some(">=1.21")).unwrap());
/// assert!(!matches_requirement(&v, Some(">=1.18, <1.20")).unwrap());
///
/// // None requirement means "apply to all versions"
/// assert!(matches_requirement(&v, None).unwrap());
/// ```
pub fn matches_requirement(
    version: &GoVersion,
    requirement: Option<&str>,
) -> Result<bool, VersionError> {
    let Some(req_str) = requirement else {
        return Ok(true);
    };

    // Empty requirement string means "apply to all versions"
    if req_str.trim().is_empty() {
        return Ok(true);
    }

    let req = parse_requirement(req_str)?;
    Ok(req.matches(&version.to_semver()))
}
