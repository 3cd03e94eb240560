use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::{Dialect, LineInput};
use crate::platform::Platform;

use super::{CompletionMarker, ExecutionConfig, RunHarness, RunSpec, Runnable};

const COMPLETION: CompletionMarker = CompletionMarker {
    text: "Loop time",
    tail: 40,
    elapsed: elapsed_field,
};

fn elapsed_field(line: &str) -> Option<&str> {
    line.split_whitespace().nth(3)
}

/// A LAMMPS run with a line-match dialect input.
///
/// The process count comes from the `processors x y z` line. A restart is
/// not a command flag here: setup prepends a `read_restart` line to the
/// patched input instead.
pub struct LammpsRun {
    harness: RunHarness,
}

impl LammpsRun {
    pub fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            harness: RunHarness::new(spec)?,
        })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        self.harness.patch_inputs(Dialect::Line)?;
        self.prepend_restart()?;
        Ok(())
    }

    fn prepend_restart(&self) -> RunResult<()> {
        let Some(start) = self.harness.spec.start_file.path() else {
            return Ok(());
        };
        let input = self.harness.input_path();
        let text = std::fs::read_to_string(&input)
            .map_err(|source| self.harness.setup_error(source))?;
        let prepended = format!("read_restart {}\n{}", start.display(), text);
        std::fs::write(&input, prepended).map_err(|source| self.harness.setup_error(source))
    }
}

impl Runnable for LammpsRun {
    fn setup(&mut self) -> RunResult<()> {
        let result = self.setup_inner();
        self.harness.advance(result, RunState::SetUp)
    }

    fn execute(&mut self, config: &ExecutionConfig) -> RunResult<()> {
        let result = self.process_count().and_then(|nprocs| {
            let arguments = self.command_arguments("");
            self.harness.launch(nprocs, &arguments, config)
        });
        self.harness.advance(result, RunState::Executing)
    }

    fn finish(&mut self) -> RunResult<()> {
        let result = self.harness.finish_with(Some(&COMPLETION));
        self.harness.advance(result, RunState::Finished)
    }

    fn process_count(&self) -> RunResult<usize> {
        let input = LineInput::new(self.harness.input_path());
        match input.read_matching_line("processors")? {
            Some(tokens) => match grid_product(&tokens) {
                Some(nprocs) => Ok(nprocs),
                None => {
                    warn!(
                        file = %self.harness.input_path().display(),
                        "malformed 'processors' line, assuming a serial run"
                    );
                    Ok(1)
                }
            },
            None => Ok(1),
        }
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

    fn command_arguments(&self, file_prefix: &str) -> String {
        format!("-in {}{}", file_prefix, self.harness.input_file())
    }
}

/// `processors 2 4 1` carries the grid in tokens one to three.
fn grid_product(tokens: &[String]) -> Option<usize> {
    let grid = tokens.get(1..4)?;
    grid.iter().try_fold(1usize, |product, token| {
        token.parse::<usize>().ok().map(|n| product * n)
    })
}
