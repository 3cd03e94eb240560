use super::{ReplaceOutcome, read_file_text, replace_file_text, split_keep_newlines};
use crate::domain::{KeyValues, PatchError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Block-keyword dialect: the keyword sits on its own line and the lines
/// beneath it carry one value each.
///
/// ```text
/// PROCESSORS
/// 2
/// 2
/// 1
/// ```
///
/// A keyword hidden behind a single leading comment character still
/// matches, and the rewrite always emits the uncommented keyword, so a
/// change can re-activate a block that was switched off.
#[derive(Debug, Clone)]
pub struct BlockInput {
    path: PathBuf,
}

/// Result of looking up a value block for reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockLookup {
    Values(Vec<String>),
    CommentedOut,
    Missing,
}

impl BlockInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the value lines under the first occurrence of `keyword`.
    /// A `None` entry in a list keeps the corresponding line. When the
    /// keyword is absent the block is appended at the end of the file
    /// instead and the outcome says so.
    pub fn replace(&self, keyword: &str, values: &KeyValues) -> Result<ReplaceOutcome, PatchError> {
        let value_lines = values.block_lines(keyword)?;
        let text = read_file_text(&self.path)?;
        let lines = split_keep_newlines(&text);

        let mut output = String::with_capacity(text.len() + 16);
        let mut found = false;
        let mut index = 0;
        while index < lines.len() {
            let (body, terminator) = lines[index];
            if !found && line_carries_keyword(body, keyword) {
                found = true;
                output.push_str(keyword);
                output.push('\n');
                index += 1;
                for value in &value_lines {
                    let consumed = lines.get(index).copied();
                    match value {
                        Some(replacement) => {
                            output.push_str(replacement);
                            output.push('\n');
                        }
                        None => {
                            if let Some((kept_body, kept_terminator)) = consumed {
                                output.push_str(kept_body);
                                output.push_str(kept_terminator);
                            }
                        }
                    }
                    if consumed.is_some() {
                        index += 1;
                    }
                }
                continue;
            }
            output.push_str(body);
            output.push_str(terminator);
            index += 1;
        }

        if !found {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(keyword);
            output.push('\n');
            for value in value_lines.iter().flatten() {
                output.push_str(value);
                output.push('\n');
            }
            warn!(
                file = %self.path.display(),
                "input string '{}' not found, appended to file instead",
                keyword
            );
            replace_file_text(&self.path, &output)?;
            return Ok(ReplaceOutcome::Appended);
        }

        replace_file_text(&self.path, &output)?;
        Ok(ReplaceOutcome::Replaced)
    }

    /// Read the `count` trimmed value lines beneath the first line that
    /// contains `keyword`, distinguishing a commented-out block from a
    /// missing one.
    pub fn read_block(&self, keyword: &str, count: usize) -> Result<BlockLookup, PatchError> {
        let text = read_file_text(&self.path)?;
        let lines: Vec<&str> = text.lines().collect();
        for (index, line) in lines.iter().enumerate() {
            if !line.contains(keyword) {
                continue;
            }
            if line.contains('#') {
                return Ok(BlockLookup::CommentedOut);
            }
            let values = lines
                .iter()
                .skip(index + 1)
                .take(count)
                .map(|value| value.trim().to_string())
                .collect();
            return Ok(BlockLookup::Values(values));
        }
        Ok(BlockLookup::Missing)
    }
}

fn line_carries_keyword(body: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if body.starts_with(keyword) {
        return true;
    }
    // One leading comment character is tolerated.
    body.get(1..)
        .map(|rest| rest.starts_with(keyword))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;
    use std::fs;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("MD.in");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn replaces_the_value_lines_under_the_keyword() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "DENSITY\n0.8\nPROCESSORS\n1\n1\n1\nTEMP\n1.0\n");

        let outcome = BlockInput::new(&path)
            .replace("PROCESSORS", &KeyValues::list([2i64, 2, 2]))
            .unwrap();

        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "DENSITY\n0.8\nPROCESSORS\n2\n2\n2\nTEMP\n1.0\n"
        );
    }

    #[test]
    fn keep_marker_leaves_single_value_lines_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "PROCESSORS\n1\n7\n1\n");

        BlockInput::new(&path)
            .replace(
                "PROCESSORS",
                &KeyValues::List(vec![Some(Value::Int(4)), None, Some(Value::Int(2))]),
            )
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "PROCESSORS\n4\n7\n2\n");
    }

    #[test]
    fn commented_keyword_is_reactivated_uncommented() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "#PROCESSORS\n1\n1\n1\n");

        let outcome = BlockInput::new(&path)
            .replace("PROCESSORS", &KeyValues::list([2i64, 4, 2]))
            .unwrap();

        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(fs::read_to_string(&path).unwrap(), "PROCESSORS\n2\n4\n2\n");
    }

    #[test]
    fn absent_keyword_appends_the_block_and_reports_it() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "DENSITY\n0.8\n");

        let outcome = BlockInput::new(&path)
            .replace("INITIALNUNITS", &KeyValues::list([8i64, 8, 8]))
            .unwrap();

        assert_eq!(outcome, ReplaceOutcome::Appended);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "DENSITY\n0.8\nINITIALNUNITS\n8\n8\n8\n"
        );
    }

    #[test]
    fn replacing_twice_converges_on_the_latest_values() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "PROCESSORS\n1\n1\n1\n");
        let input = BlockInput::new(&path);

        input
            .replace("PROCESSORS", &KeyValues::list([2i64, 2, 2]))
            .unwrap();
        input
            .replace("PROCESSORS", &KeyValues::list([4i64, 4, 4]))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "PROCESSORS\n4\n4\n4\n");
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn read_block_distinguishes_commented_and_missing() {
        let dir = TempDir::new().unwrap();
        let path = write_input(&dir, "PROCESSORS\n2\n4\n1\n");
        let input = BlockInput::new(&path);

        assert_eq!(
            input.read_block("PROCESSORS", 3).unwrap(),
            BlockLookup::Values(vec!["2".to_string(), "4".to_string(), "1".to_string()])
        );
        assert_eq!(input.read_block("DENSITY", 1).unwrap(), BlockLookup::Missing);

        fs::write(&path, "#PROCESSORS\n2\n4\n1\n").unwrap();
        assert_eq!(
            input.read_block("PROCESSORS", 3).unwrap(),
            BlockLookup::CommentedOut
        );
    }

    #[test]
    fn missing_file_is_a_fatal_patch_error() {
        let dir = TempDir::new().unwrap();
        let input = BlockInput::new(dir.path().join("absent.in"));
        let result = input.replace("PROCESSORS", &KeyValues::list([1i64]));
        assert!(matches!(result, Err(PatchError::FileNotFound { .. })));
    }
}
