//! Keyword replacement for the line-oriented input dialects.
//!
//! Each dialect rewrites a file through a scratch copy in the same
//! directory followed by a rename; none of them promise durability beyond
//! that. Missing keywords are soft outcomes reported to the caller and
//! logged, not errors.

mod block;
mod commented;
mod line;
mod script;

pub use block::{BlockInput, BlockLookup};
pub use commented::CommentedInput;
pub use line::LineInput;
pub use script::{ScriptInput, ScriptTarget};

use crate::domain::{KeyValues, PatchError};
use globset::Glob;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// How a replacement landed in the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Keyword found; values substituted in place.
    Replaced,
    /// Keyword absent; keyword and values appended at end of file.
    Appended,
    /// Keyword absent; file rewritten unchanged.
    NotFound,
}

impl ReplaceOutcome {
    pub const fn found(self) -> bool {
        matches!(self, Self::Replaced)
    }
}

/// Dialect selector for callers that configure patching by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Block,
    Commented,
    Line,
}

impl Dialect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "block" => Some(Self::Block),
            "commented" => Some(Self::Commented),
            "line" => Some(Self::Line),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Commented => "commented",
            Self::Line => "line",
        }
    }

    pub fn replace(
        self,
        file: &Path,
        keyword: &str,
        values: &KeyValues,
    ) -> Result<ReplaceOutcome, PatchError> {
        match self {
            Self::Block => BlockInput::new(file).replace(keyword, values),
            Self::Commented => CommentedInput::new(file).replace(keyword, values),
            Self::Line => LineInput::new(file).replace(keyword, values),
        }
    }
}

/// Apply one keyword change to every file in `dir` whose name matches
/// `pattern`. Files are visited in name order; the per-file outcomes are
/// returned alongside their paths.
pub fn patch_matching(
    dir: &Path,
    pattern: &str,
    dialect: Dialect,
    keyword: &str,
    values: &KeyValues,
) -> Result<Vec<(PathBuf, ReplaceOutcome)>, PatchError> {
    let matcher = Glob::new(pattern)
        .map_err(|source| PatchError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?
        .compile_matcher();

    let mut targets: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| io_patch_error(dir, source))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| matcher.is_match(name))
                .unwrap_or(false)
        })
        .collect();
    targets.sort();

    let mut outcomes = Vec::with_capacity(targets.len());
    for target in targets {
        let outcome = dialect.replace(&target, keyword, values)?;
        outcomes.push((target, outcome));
    }
    Ok(outcomes)
}

pub(crate) fn read_file_text(path: &Path) -> Result<String, PatchError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            PatchError::FileNotFound {
                path: path.to_path_buf(),
                source,
            }
        } else {
            io_patch_error(path, source)
        }
    })
}

/// Write `text` to a scratch file next to `path` and rename it over the
/// original.
pub(crate) fn replace_file_text(path: &Path, text: &str) -> Result<(), PatchError> {
    let scratch = scratch_path(path);
    fs::write(&scratch, text).map_err(|source| io_patch_error(&scratch, source))?;
    fs::rename(&scratch, path).map_err(|source| io_patch_error(path, source))
}

pub(crate) fn io_patch_error(path: &Path, source: std::io::Error) -> PatchError {
    PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn scratch_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Split text into lines with their terminators kept, so untouched lines
/// round-trip byte-for-byte.
pub(crate) fn split_keep_newlines(text: &str) -> Vec<(&str, &str)> {
    text.split_inclusive('\n')
        .map(|segment| match segment.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (segment, ""),
        })
        .collect()
}
