//! Trap registration rules: which functions and variables get instrumented.
//!
//! Rules are evaluated in order and the first match decides. When nothing
//! matches, main-module and third-party code is instrumented and the
//! standard library is not.
//!
//! The patched compiler reads the rule list as JSON from the file named by
//! [`OPTIONS_FILE_ENV`].

use crate::edit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that switches trap weaving on in the patched compiler.
pub const ENABLE_ENV: &str = "XGO_COMPILER_ENABLE";
/// Environment variable naming the exported rule file.
pub const OPTIONS_FILE_ENV: &str = "XGO_COMPILER_OPTIONS_FILE";
/// Environment variable naming the main module path; packages under it
/// count as main-module code in the patched compiler.
pub const MAIN_MODULE_ENV: &str = "XGO_MAIN_MODULE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Func,
    Var,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Func => "func",
            Kind::Var => "var",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Include,
    Exclude,
}

/// One filter rule. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    /// Exact import path, or `prefix/...` for a package tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdlib: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_module: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure: Option<bool>,
    #[serde(default)]
    pub action: Action,
}

/// A candidate function or package-level variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: Kind,
    pub pkg: String,
    pub name: String,
    pub stdlib: bool,
    pub main_module: bool,
    pub generic: bool,
    pub exported: bool,
    pub closure: bool,
}

impl Target {
    pub fn func(pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Kind::Func, pkg.into(), name.into())
    }

    pub fn var(pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Kind::Var, pkg.into(), name.into())
    }

    fn new(kind: Kind, pkg: String, name: String) -> Self {
        let exported = name.chars().next().is_some_and(char::is_uppercase);
        Self {
            kind,
            pkg,
            name,
            stdlib: false,
            main_module: false,
            generic: false,
            exported,
            closure: false,
        }
    }

    pub fn stdlib(mut self) -> Self {
        self.stdlib = true;
        self
    }

    pub fn main_module(mut self) -> Self {
        self.main_module = true;
        self
    }

    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    pub fn closure(mut self) -> Self {
        self.closure = true;
        self
    }
}

fn pkg_matches(pattern: &str, pkg: &str) -> bool {
    match pattern.strip_suffix("/...") {
        Some(prefix) => {
            pkg == prefix || pkg.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
        }
        None => pattern == pkg,
    }
}

fn flag_matches(want: Option<bool>, have: bool) -> bool {
    want.map_or(true, |w| w == have)
}

impl Rule {
    pub fn matches(&self, target: &Target) -> bool {
        self.kind.map_or(true, |k| k == target.kind)
            && self.pkg.as_deref().map_or(true, |p| pkg_matches(p, &target.pkg))
            && self.name.as_deref().map_or(true, |n| n == target.name)
            && flag_matches(self.stdlib, target.stdlib)
            && flag_matches(self.main_module, target.main_module)
            && flag_matches(self.generic, target.generic)
            && flag_matches(self.exported, target.exported)
            && flag_matches(self.closure, target.closure)
    }
}

/// Why a target was or was not selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub include: bool,
    /// Index of the deciding rule; `None` means the default applied
    pub rule: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("failed to read rules from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules TOML: {0}")]
    Toml(#[from] toml_edit::de::Error),

    #[error("failed to parse rules JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule #{index}: {reason}")]
    Invalid { index: usize, reason: &'static str },

    #[error(transparent)]
    Edit(#[from] edit::EditError),
}

impl RuleSet {
    /// First matching rule decides; otherwise include everything but stdlib.
    pub fn decide(&self, target: &Target) -> Decision {
        match self.rules.iter().position(|r| r.matches(target)) {
            Some(index) => Decision {
                include: self.rules[index].action == Action::Include,
                rule: Some(index),
            },
            None => Decision {
                include: !target.stdlib,
                rule: None,
            },
        }
    }

    pub fn includes(&self, target: &Target) -> bool {
        self.decide(target).include
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if let Some(pkg) = &rule.pkg {
                if pkg.trim().is_empty() || pkg == "..." {
                    return Err(RuleError::Invalid {
                        index,
                        reason: "pkg must name a package or package tree",
                    });
                }
            }
            if rule.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                return Err(RuleError::Invalid {
                    index,
                    reason: "name must not be empty",
                });
            }
        }
        Ok(())
    }

    pub fn from_toml(input: &str) -> Result<Self, RuleError> {
        let set: RuleSet = toml_edit::de::from_str(input)?;
        set.validate()?;
        Ok(set)
    }

    pub fn from_json(input: &str) -> Result<Self, RuleError> {
        let set: RuleSet = serde_json::from_str(input)?;
        set.validate()?;
        Ok(set)
    }

    /// Load by extension: `.json` is JSON, anything else TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&input),
            _ => Self::from_toml(&input),
        }
    }

    pub fn to_json(&self) -> Result<String, RuleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the compiler options file (atomic, only when changed).
    pub fn export(&self, path: &Path) -> Result<bool, RuleError> {
        let json = self.to_json()?;
        let existing = fs::read_to_string(path).unwrap_or_default();
        let outcome = edit::write_if_changed(path, &existing, &json)?;
        Ok(matches!(outcome, edit::WriteOutcome::Written { .. }))
    }
}
