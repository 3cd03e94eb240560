use super::{ReplaceOutcome, read_file_text, replace_file_text, split_keep_newlines};
use crate::domain::{KeyValues, PatchError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Commented-value dialect: each line is `value <ws> name...`, the name
/// doubling as the comment.
///
/// ```text
/// 0.005               !Time step delta t
/// 1.6                 !Viscosity
/// 0.8                 !Density
/// ```
///
/// A line matches when its second whitespace token equals the keyword; the
/// first token is then replaced. Everything else round-trips byte-for-byte.
#[derive(Debug, Clone)]
pub struct CommentedInput {
    path: PathBuf,
}

impl CommentedInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace(&self, keyword: &str, values: &KeyValues) -> Result<ReplaceOutcome, PatchError> {
        let replacement = values.single_value(keyword)?;
        let text = read_file_text(&self.path)?;

        let mut output = String::with_capacity(text.len());
        let mut matched = 0usize;
        for (body, terminator) in split_keep_newlines(&text) {
            match value_span(body, keyword) {
                Some((start, end)) => {
                    matched += 1;
                    output.push_str(&body[..start]);
                    output.push_str(&replacement);
                    output.push_str(&body[end..]);
                }
                None => output.push_str(body),
            }
            output.push_str(terminator);
        }

        replace_file_text(&self.path, &output)?;
        if matched == 0 {
            warn!(
                file = %self.path.display(),
                "input string '{}' not found",
                keyword
            );
            return Ok(ReplaceOutcome::NotFound);
        }
        Ok(ReplaceOutcome::Replaced)
    }

    /// First token of the first line annotated with `keyword`, if any.
    pub fn read_value(&self, keyword: &str) -> Result<Option<String>, PatchError> {
        let text = read_file_text(&self.path)?;
        for line in text.lines() {
            if let Some((start, end)) = value_span(line, keyword) {
                return Ok(Some(line[start..end].to_string()));
            }
        }
        Ok(None)
    }
}

/// Byte span of the value token on a line whose second token is `keyword`.
fn value_span(body: &str, keyword: &str) -> Option<(usize, usize)> {
    let mut tokens = body.split_whitespace();
    let value = tokens.next()?;
    let name = tokens.next()?;
    if name != keyword {
        return None;
    }
    let start = body.len() - body.trim_start().len();
    Some((start, start + value.len()))
}
