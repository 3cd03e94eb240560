use std::path::{Path, PathBuf};

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::{ScriptInput, ScriptTarget};
use crate::platform::Platform;

use super::{ExecutionConfig, RunHarness, RunSpec, Runnable};

/// A standalone script run serially in its own directory.
///
/// The script is both the executable and the input file; changes are
/// applied through the script dialect, where a keyword that parses as an
/// integer targets that 1-based line and anything else targets the first
/// line containing it. Scripts launch bare unless the spec overrides the
/// prefix.
pub struct ScriptRun {
    harness: RunHarness,
}

impl ScriptRun {
    pub fn new(mut spec: RunSpec) -> Result<Self, ConfigurationError> {
        if spec.launch_prefix.is_none() {
            spec.launch_prefix = Some(String::new());
        }
        Ok(Self {
            harness: RunHarness::new(spec)?,
        })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        self.patch_script()?;
        Ok(())
    }

    fn patch_script(&self) -> RunResult<()> {
        if self.harness.spec.changes.is_empty() {
            return Ok(());
        }
        let input = ScriptInput::new(self.harness.input_path());
        for (keyword, values) in self.harness.spec.changes.iter() {
            input.replace(&script_target(keyword), values)?;
        }
        Ok(())
    }
}

/// An all-digit keyword addresses a line by number, anything else by
/// content.
fn script_target(keyword: &str) -> ScriptTarget {
    match keyword.parse::<usize>() {
        Ok(number) if number > 0 => ScriptTarget::LineNumber(number),
        _ => ScriptTarget::Keyword(keyword.to_string()),
    }
}

impl Runnable for ScriptRun {
    fn setup(&mut self) -> RunResult<()> {
        let result = self.setup_inner();
        self.harness.advance(result, RunState::SetUp)
    }

    fn execute(&mut self, config: &ExecutionConfig) -> RunResult<()> {
        let result = self.harness.launch(1, "", config);
        self.harness.advance(result, RunState::Executing)
    }

    fn finish(&mut self) -> RunResult<()> {
        let result = self.harness.finish_with(None);
        self.harness.advance(result, RunState::Finished)
    }

    fn process_count(&self) -> RunResult<usize> {
        Ok(1)
    }

    fn state(&self) -> RunState {
        self.harness.state()
    }

    fn run_dir(&self) -> &Path {
        self.harness.run_dir()
    }

    fn platform(&self) -> Platform {
        self.harness.platform()
    }

    fn rebase(&mut self, run_dir: PathBuf) {
        self.harness.rebase(run_dir);
    }

    fn set_copy_mode(&mut self, mode: CopyMode) {
        self.harness.set_copy_mode(mode);
    }

    fn executable_name(&self) -> &str {
        &self.harness.spec.executable
    }
}
