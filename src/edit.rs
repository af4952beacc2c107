use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The in-memory edit primitive: byte-span replacement on a source string.
///
/// Region insertion and region replacement both compile down to a [`Splice`].
/// The span must fall on UTF-8 character boundaries of the buffer it is
/// applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Splice does nothing until apply_to() is called"]
pub struct Splice {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Text that replaces [byte_start, byte_end)
    pub new_text: String,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Invalid byte range: [{byte_start}, {byte_end}) in content of length {len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        len: usize,
    },

    #[error("Byte offset {offset} is not on a UTF-8 character boundary")]
    NotCharBoundary { offset: usize },

    #[error("File I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Splice {
    /// Pure insertion at `at`.
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            byte_start: at,
            byte_end: at,
            new_text: text.into(),
        }
    }

    /// Replacement of `[byte_start, byte_end)`.
    pub fn replace(byte_start: usize, byte_end: usize, text: impl Into<String>) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: text.into(),
        }
    }

    fn validate(&self, content: &str) -> Result<(), EditError> {
        if self.byte_start > self.byte_end || self.byte_end > content.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                len: content.len(),
            });
        }
        for offset in [self.byte_start, self.byte_end] {
            if !content.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary { offset });
            }
        }
        Ok(())
    }

    /// Apply to `content`, returning the new buffer.
    pub fn apply_to(&self, content: &str) -> Result<String, EditError> {
        self.validate(content)?;

        let mut out = String::with_capacity(
            content.len() + self.new_text.len() - (self.byte_end - self.byte_start),
        );
        out.push_str(&content[..self.byte_start]);
        out.push_str(&self.new_text);
        out.push_str(&content[self.byte_end..]);
        Ok(out)
    }
}

/// xxh3 fingerprint of file content, reported before/after patching.
pub fn digest(content: &str) -> u64 {
    xxh3_64(content.as_bytes())
}

/// Outcome of [`write_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "WriteOutcome tells whether the file was touched"]
pub enum WriteOutcome {
    Written { bytes: usize },
    Unchanged,
}

/// Write `updated` to `path` only if it differs from `original`.
///
/// Skipping identical content keeps the mtime stable so the Go build cache
/// does not rebuild the toolchain for nothing.
pub fn write_if_changed(
    path: &Path,
    original: &str,
    updated: &str,
) -> Result<WriteOutcome, EditError> {
    if original == updated {
        return Ok(WriteOutcome::Unchanged);
    }
    atomic_write(path, updated.as_bytes())?;
    Ok(WriteOutcome::Written {
        bytes: updated.len(),
    })
}

/// Read a UTF-8 file, attaching the path to any error.
pub fn read_source(path: &Path) -> Result<String, EditError> {
    fs::read_to_string(path).map_err(|source| EditError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomic file write: tempfile + fsync + rename, then mtime bump.
///
/// Either the full write succeeds or nothing changes.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    let io_err = |source: std::io::Error| EditError::Io {
        path: path.to_path_buf(),
        source,
    };

    // Create tempfile in same directory to ensure same filesystem
    let parent = path.parent().ok_or_else(|| {
        io_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Path has no parent directory",
        ))
    })?;
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    temp.write_all(content).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;

    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now).map_err(io_err)?;

    Ok(())
}
