use super::{ReplaceOutcome, read_file_text, replace_file_text, split_keep_newlines};
use crate::domain::{KeyValues, PatchError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Line-match dialect for free-form inputs where a keyword can be a
/// multi-word fragment sitting anywhere in the line.
///
/// ```text
/// variable            maxy equal 2.0
/// processors          1 2 4
/// fix  5 all cpl/init region all forcetype Drag Cd 0.1
/// ```
///
/// Matching collapses runs of whitespace in both the line and the keyword;
/// every matching line is rewritten as `keyword` plus the values (keeping
/// whatever preceded the keyword), while non-matching lines keep their
/// spacing untouched.
#[derive(Debug, Clone)]
pub struct LineInput {
    path: PathBuf,
}

impl LineInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace(&self, keyword: &str, values: &KeyValues) -> Result<ReplaceOutcome, PatchError> {
        let rendered = values.joined_values(keyword)?;
        let text = read_file_text(&self.path)?;

        let mut output = String::with_capacity(text.len());
        let mut matched = 0usize;
        for (body, terminator) in split_keep_newlines(&text) {
            match rewrite_matching_line(body, keyword, &rendered) {
                Some(new_body) => {
                    matched += 1;
                    output.push_str(&new_body);
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

    /// Whitespace-collapsed tokens of the first line containing `keyword`.
    pub fn read_matching_line(&self, keyword: &str) -> Result<Option<Vec<String>>, PatchError> {
        let text = read_file_text(&self.path)?;
        let needle = collapse_whitespace(keyword);
        if needle.is_empty() {
            return Ok(None);
        }
        for line in text.lines() {
            let collapsed = collapse_whitespace(line);
            if collapsed.contains(&needle) {
                return Ok(Some(
                    collapsed.split(' ').map(|token| token.to_string()).collect(),
                ));
            }
        }
        Ok(None)
    }
}

/// The replacement line for `body` if its collapsed form contains the
/// collapsed keyword, keeping any prefix before the keyword.
pub(crate) fn rewrite_matching_line(
    body: &str,
    keyword: &str,
    rendered: &[String],
) -> Option<String> {
    let needle = collapse_whitespace(keyword);
    if needle.is_empty() {
        return None;
    }
    let collapsed = collapse_whitespace(body);
    let index = collapsed.find(&needle)?;

    let values = rendered.join(" ");
    if index == 0 {
        Some(format!("{}   {}", keyword, values))
    } else {
        let prefix = collapsed[..index].trim_end();
        Some(format!("{} {} {}", prefix, keyword, values))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
