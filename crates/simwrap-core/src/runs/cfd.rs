use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::{CommentedInput, Dialect};
use crate::platform::Platform;

use super::{CompletionMarker, ExecutionConfig, RunHarness, RunSpec, Runnable};

const COMPLETION: CompletionMarker = CompletionMarker {
    text: "Time taken",
    tail: 10,
    elapsed: elapsed_field,
};

fn elapsed_field(line: &str) -> Option<&str> {
    line.split_whitespace().nth(2)
}

/// A channel-flow CFD run with a commented-value dialect input.
///
/// The solver takes its input file as a bare positional argument; the
/// decomposition grid lives on the `npx`, `npy`, `npz` annotated lines.
pub struct CfdRun {
    harness: RunHarness,
}

impl CfdRun {
    pub fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            harness: RunHarness::new(spec)?,
        })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        self.harness.patch_inputs(Dialect::Commented)?;
        Ok(())
    }
}

impl Runnable for CfdRun {
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
        let input = CommentedInput::new(self.harness.input_path());
        let mut nprocs = 1usize;
        for keyword in ["npx", "npy", "npz"] {
            let Some(value) = input.read_value(keyword)? else {
                warn!(
                    file = %self.harness.input_path().display(),
                    "no '{keyword}' line, assuming a serial run"
                );
                return Ok(1);
            };
            match value.parse::<usize>() {
                Ok(n) => nprocs *= n,
                Err(_) => {
                    warn!(
                        file = %self.harness.input_path().display(),
                        "'{keyword}' value '{value}' is not a process count, assuming a serial run"
                    );
                    return Ok(1);
                }
            }
        }
        Ok(nprocs)
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
        format!("{}{}", file_prefix, self.harness.input_file())
    }
}
