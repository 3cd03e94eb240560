use super::line::rewrite_matching_line;
use super::{ReplaceOutcome, read_file_text, replace_file_text, split_keep_newlines};
use crate::domain::{KeyValues, PatchError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where a script patch lands: an exact 1-based line number, or the first
/// line containing a keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTarget {
    LineNumber(usize),
    Keyword(String),
}

/// Patcher for queue and post-processing scripts, where at most one line
/// should ever change.
#[derive(Debug, Clone)]
pub struct ScriptInput {
    path: PathBuf,
}

impl ScriptInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replace(
        &self,
        target: &ScriptTarget,
        values: &KeyValues,
    ) -> Result<ReplaceOutcome, PatchError> {
        let text = read_file_text(&self.path)?;
        let mut output = String::with_capacity(text.len());
        let mut matched = false;

        match target {
            ScriptTarget::LineNumber(number) => {
                let rendered = values.joined_values("script line")?.join(" ");
                for (index, (body, terminator)) in split_keep_newlines(&text).into_iter().enumerate() {
                    if index + 1 == *number {
                        matched = true;
                        output.push_str(&rendered);
                    } else {
                        output.push_str(body);
                    }
                    output.push_str(terminator);
                }
            }
            ScriptTarget::Keyword(keyword) => {
                let rendered = values.joined_values(keyword)?;
                for (body, terminator) in split_keep_newlines(&text) {
                    if !matched {
                        if let Some(new_body) = rewrite_matching_line(body, keyword, &rendered) {
                            matched = true;
                            output.push_str(&new_body);
                            output.push_str(terminator);
                            continue;
                        }
                    }
                    output.push_str(body);
                    output.push_str(terminator);
                }
            }
        }

        replace_file_text(&self.path, &output)?;
        if !matched {
            warn!(
                file = %self.path.display(),
                "script target {:?} not found",
                target
            );
            return Ok(ReplaceOutcome::NotFound);
        }
        Ok(ReplaceOutcome::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SCRIPT: &str = "#!/bin/sh\nNSTEPS=100\npython plot.py results\nNSTEPS=100\n";

    fn write_script(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("post.sh");
        fs::write(&path, SCRIPT).unwrap();
        path
    }

    #[test]
    fn line_number_target_replaces_exactly_that_line() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir);

        let outcome = ScriptInput::new(&path)
            .replace(
                &ScriptTarget::LineNumber(2),
                &KeyValues::scalar("NSTEPS=500"),
            )
            .unwrap();

        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "#!/bin/sh\nNSTEPS=500\npython plot.py results\nNSTEPS=100\n"
        );
    }

    #[test]
    fn keyword_target_replaces_only_the_first_match() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir);

        ScriptInput::new(&path)
            .replace(
                &ScriptTarget::Keyword("NSTEPS".to_string()),
                &KeyValues::scalar("=500"),
            )
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("NSTEPS   =500\n"));
        assert!(content.contains("NSTEPS=100\n"));
    }

    #[test]
    fn out_of_range_line_number_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write_script(&dir);

        let outcome = ScriptInput::new(&path)
            .replace(&ScriptTarget::LineNumber(99), &KeyValues::scalar("x"))
            .unwrap();

        assert_eq!(outcome, ReplaceOutcome::NotFound);
        assert_eq!(fs::read_to_string(&path).unwrap(), SCRIPT);
    }
}
