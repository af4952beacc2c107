use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Confines patch targets to `<root>/src` of one toolchain copy.
#[derive(Debug, Clone)]
pub struct ToolchainGuard {
    /// Canonical toolchain root
    root: PathBuf,
    /// `<root>/src`, canonical when it exists
    src_root: PathBuf,
    /// Canonical paths to forbidden directories
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("target must be a relative path without '..': {path} ({reason})")]
    InvalidTarget { path: String, reason: &'static str },

    #[error("path is outside the toolchain source tree: {path} (source tree: {src_root})")]
    OutsideSourceTree { path: PathBuf, src_root: PathBuf },

    #[error("path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("failed to canonicalize {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolchainGuard {
    /// Create a guard for the toolchain at `root`.
    ///
    /// The shared module cache (`$HOME/go/pkg/mod`) is always forbidden, and
    /// a root inside it is rejected up front.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let mut forbidden_paths = Vec::new();
        if let Some(home) = home::home_dir() {
            if let Ok(mod_cache) = home.join("go/pkg/mod").canonicalize() {
                forbidden_paths.push(mod_cache);
            }
        }
        Self::with_forbidden(root, forbidden_paths)
    }

    /// Create a guard with explicit forbidden directories.
    pub fn with_forbidden(
        root: impl AsRef<Path>,
        forbidden: Vec<PathBuf>,
    ) -> Result<Self, SafetyError> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| SafetyError::Canonicalize {
            path: root.to_path_buf(),
            source,
        })?;
        let src_root = canonical_prefix(&root.join("src"))?;

        let guard = Self {
            root,
            src_root,
            forbidden_paths: forbidden,
        };
        guard.check_forbidden(&guard.root)?;
        Ok(guard)
    }

    /// Resolve a slash-separated target like `src/runtime/proc.go`.
    ///
    /// The file need not exist yet (overlay files are created), but every
    /// existing ancestor is canonicalized so symlinks cannot escape.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SafetyError> {
        let invalid = |reason| SafetyError::InvalidTarget {
            path: relative.to_string(),
            reason,
        };

        let candidate = Path::new(relative);
        if candidate.is_absolute() || relative.starts_with('/') {
            return Err(invalid("absolute path"));
        }

        let mut joined = self.root.clone();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            match Path::new(component).components().next() {
                Some(Component::Normal(_)) => joined.push(component),
                Some(Component::CurDir) => {}
                Some(Component::ParentDir) => return Err(invalid("parent directory component")),
                _ => return Err(invalid("unexpected path component")),
            }
        }

        let canonical = canonical_prefix(&joined)?;
        if !canonical.starts_with(&self.src_root) || canonical == self.src_root {
            return Err(SafetyError::OutsideSourceTree {
                path: canonical,
                src_root: self.src_root.clone(),
            });
        }
        self.check_forbidden(&canonical)?;

        Ok(canonical)
    }

    fn check_forbidden(&self, canonical: &Path) -> Result<(), SafetyError> {
        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-attach the
/// components that do not exist yet.
fn canonical_prefix(path: &Path) -> Result<PathBuf, SafetyError> {
    let mut missing = Vec::new();
    let mut cursor = path;

    loop {
        if cursor.exists() {
            let mut resolved = cursor.canonicalize().map_err(|source| SafetyError::Canonicalize {
                path: cursor.to_path_buf(),
                source,
            })?;
            for component in missing.iter().rev() {
                resolved.push(component);
            }
            return Ok(resolved);
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                cursor = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
}
