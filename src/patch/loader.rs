use crate::anchor::Placement;
use crate::dispatch::VersionPredicate;
use crate::patch::schema::{FilePatch, Patch, ValidationError};
use crate::version::{parse_requirement, GoVersion, VersionError};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A user-supplied patch set, usually one TOML file.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub files: Vec<FileDefinition>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Semver requirement gating the whole set, e.g. `">=1.20"`
    #[serde(default)]
    pub version_range: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileDefinition {
    pub path: String,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    #[serde(default)]
    pub mark: String,
    #[serde(default)]
    pub anchors: Vec<String>,
    /// Defaults to the last anchor
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub position: Placement,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_unique")]
    pub unique: bool,
}

fn default_unique() -> bool {
    true
}

impl PatchSet {
    /// Whether the set-level `version_range` admits `version`.
    pub fn applies_to(&self, version: &GoVersion) -> Result<bool, VersionError> {
        crate::version::matches_requirement(version, self.meta.version_range.as_deref())
    }

    /// Convert into validated file patch descriptors.
    ///
    /// A patch-level `version` is intersected with the set's `version_range`.
    pub fn to_file_patches(&self) -> Result<Vec<FilePatch>, ConfigError> {
        let set_range = self
            .meta
            .version_range
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let mut out = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let mut fp = FilePatch::new(file.path.clone());
            for def in &file.patches {
                let own = def.version.as_deref().map(str::trim).filter(|r| !r.is_empty());
                let requirement = match (set_range, own) {
                    (Some(set), Some(own)) => Some(format!("{set}, {own}")),
                    (Some(r), None) | (None, Some(r)) => Some(r.to_string()),
                    (None, None) => None,
                };
                let applies_to = match requirement {
                    Some(req) => VersionPredicate::Requirement(
                        parse_requirement(&req).map_err(ConfigError::Version)?,
                    ),
                    None => VersionPredicate::Any,
                };

                // TOML multi-line strings keep the newline before the closing
                // quotes; the region block supplies its own.
                let content = def.content.strip_suffix('\n').unwrap_or(&def.content);

                fp.patches.push(Patch {
                    mark: def.mark.clone(),
                    anchors: def.anchors.clone(),
                    index: def.index.unwrap_or(def.anchors.len().saturating_sub(1)),
                    placement: def.position,
                    content: content.to_string(),
                    applies_to,
                    unique: def.unique,
                });
            }
            fp.validate()
                .map_err(|source| ConfigError::Validation { path: None, source })?;
            out.push(fp);
        }
        Ok(out)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Version(VersionError),
    Walk(walkdir::Error),
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read patch set from {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
            ConfigError::Version(e) => write!(f, "invalid patch set: {}", e),
            ConfigError::Walk(e) => write!(f, "failed to scan patch directory: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Version(e) => Some(e),
            ConfigError::Walk(e) => Some(e),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let set: PatchSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    // validates every descriptor up front
    set.to_file_patches()?;
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load every `*.toml` under `dir`, sorted by path.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<(PathBuf, PatchSet)>, ConfigError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).sort_by_file_name() {
        let entry = entry.map_err(ConfigError::Walk)?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            paths.push(entry.into_path());
        }
    }

    paths
        .into_iter()
        .map(|path| load_from_path(&path).map(|set| (path, set)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET: &str = r#"
[meta]
name = "timer-hooks"
version_range = ">=1.20"

[[files]]
path = "src/time/sleep.go"

[[files.patches]]
mark = "timer_hook"
anchors = ["func Sleep(d Duration)", "\n"]
content = """
// hooked
"""

[[files.patches]]
mark = "timer_hook_new"
anchors = ["func NewTimer(d Duration) *Timer {", "\n"]
position = "before"
index = 0
version = ">=1.23"
unique = false
content = "// new api"
"#;

    #[test]
    fn test_load_set() {
        let set = load_from_str(SET).unwrap();
        assert_eq!(set.meta.name, "timer-hooks");
        let files = set.to_file_patches().unwrap();
        assert_eq!(files.len(), 1);

        let patches = &files[0].patches;
        assert_eq!(patches[0].index, 1);
        assert_eq!(patches[0].placement, Placement::After);
        assert_eq!(patches[0].content, "// hooked");
        assert!(patches[0].unique);

        assert_eq!(patches[1].index, 0);
        assert_eq!(patches[1].placement, Placement::Before);
        assert!(!patches[1].unique);
    }

    #[test]
    fn test_set_range_intersects_patch_range() {
        let files = load_from_str(SET).unwrap().to_file_patches().unwrap();
        let p0 = &files[0].patches[0];
        let p1 = &files[0].patches[1];
        assert!(!p0.applies_to(&GoVersion::new(1, 19, 0)));
        assert!(p0.applies_to(&GoVersion::new(1, 20, 0)));
        assert!(!p1.applies_to(&GoVersion::new(1, 22, 0)));
        assert!(p1.applies_to(&GoVersion::new(1, 23, 0)));
    }

    #[test]
    fn test_invalid_patch_rejected() {
        let input = r#"
[[files]]
path = "src/a.go"

[[files.patches]]
mark = "m"
anchors = ["x"]
"#;
        assert!(matches!(
            load_from_str(input),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_bad_requirement_rejected() {
        let input = r#"
[[files]]
path = "src/a.go"

[[files.patches]]
mark = "m"
anchors = ["x"]
content = "y"
version = ">=banana"
"#;
        assert!(matches!(load_from_str(input), Err(ConfigError::Version(_))));
    }

    #[test]
    fn test_load_from_path_attaches_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "[[files]\n").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"), "{err}");
    }

    #[test]
    fn test_load_dir_sorted() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("b.toml"), SET).unwrap();
        fs::write(temp_dir.path().join("a.toml"), SET).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        let sets = load_dir(temp_dir.path()).unwrap();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].0.ends_with("a.toml"));
    }
}
