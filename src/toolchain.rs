use crate::version::{GoVersion, VersionError, VersionOutput};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("toolchain root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("no go binary or VERSION file under {0}")]
    NoVersionSource(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: PathBuf,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("could not determine GOROOT: pass --goroot, set GOROOT, or put go on PATH")]
    NoGoroot,
}

/// A toolchain copy on disk with its detected version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub root: PathBuf,
    pub version: GoVersion,
    /// Present when the version came from `go version`
    pub target: Option<(String, String)>,
}

impl Toolchain {
    /// Detect the version of the toolchain at `root`.
    pub fn detect(root: impl AsRef<Path>) -> Result<Self, ToolchainError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ToolchainError::MissingRoot(root.to_path_buf()));
        }

        let go = go_binary(root);
        if go.is_file() {
            let out = run_go_version(&go, root)?;
            debug!(root = %root.display(), version = %out.version, "version from go binary");
            return Ok(Self {
                root: root.to_path_buf(),
                version: out.version,
                target: Some((out.goos, out.goarch)),
            });
        }

        let version = read_version_file(root)?;
        debug!(root = %root.display(), %version, "version from VERSION file");
        Ok(Self {
            root: root.to_path_buf(),
            version,
            target: None,
        })
    }

    /// Use an explicit version instead of detecting one.
    pub fn with_version(root: impl AsRef<Path>, version: GoVersion) -> Result<Self, ToolchainError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ToolchainError::MissingRoot(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            version,
            target: None,
        })
    }
}

pub fn go_binary(root: &Path) -> PathBuf {
    let name = if cfg!(windows) { "go.exe" } else { "go" };
    root.join("bin").join(name)
}

fn run_go_version(go: &Path, root: &Path) -> Result<VersionOutput, ToolchainError> {
    let output = Command::new(go)
        .arg("version")
        .env("GOROOT", root)
        .env("GOTOOLCHAIN", "local")
        .output()
        .map_err(|source| ToolchainError::Spawn {
            program: go.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolchainError::CommandFailed {
            program: go.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(GoVersion::parse_output(&String::from_utf8_lossy(&output.stdout))?)
}

/// First line of `<root>/VERSION`, e.g. `go1.21.3`.
pub fn read_version_file(root: &Path) -> Result<GoVersion, ToolchainError> {
    let path = root.join("VERSION");
    if !path.is_file() {
        return Err(ToolchainError::NoVersionSource(root.to_path_buf()));
    }
    let text = fs::read_to_string(&path).map_err(|source| ToolchainError::Io {
        path: path.clone(),
        source,
    })?;
    let first = text.lines().next().unwrap_or("").trim();
    Ok(GoVersion::parse_tag(first)?)
}

/// Resolve the toolchain root: explicit path, then `GOROOT`, then `go env GOROOT`.
pub fn resolve_goroot(explicit: Option<&Path>) -> Result<PathBuf, ToolchainError> {
    resolve_goroot_from(explicit, std::env::var_os("GOROOT"), query_go_env_goroot)
}

fn resolve_goroot_from(
    explicit: Option<&Path>,
    env: Option<OsString>,
    query: impl FnOnce() -> Option<PathBuf>,
) -> Result<PathBuf, ToolchainError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(env) = env.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env));
    }
    query().ok_or(ToolchainError::NoGoroot)
}

fn query_go_env_goroot() -> Option<PathBuf> {
    let output = Command::new("go").args(["env", "GOROOT"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!root.is_empty()).then(|| PathBuf::from(root))
}
