use std::path::{Path, PathBuf};

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::Dialect;
use crate::platform::Platform;

use super::{ExecutionConfig, RunHarness, RunSpec, Runnable};

/// The plainest possible run: one process, no command arguments, no
/// completion marker. Input changes, when present, use the block dialect.
///
/// Useful for utility executables that share a run directory layout with
/// the simulators but none of their conventions.
pub struct MinimalRun {
    harness: RunHarness,
}

impl MinimalRun {
    pub fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            harness: RunHarness::new(spec)?,
        })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        self.harness.patch_inputs(Dialect::Block)
    }
}

impl Runnable for MinimalRun {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeyValues, Value};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn patches_the_input_and_reports_a_serial_process_count() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("tool.exe"), "").unwrap();
        fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

        let spec = RunSpec::new(base.path(), scratch.path().join("r"), "tool.exe", "input.in")
            .change("NSTEPS", KeyValues::scalar(Value::Int(500)));
        let mut run = MinimalRun::new(spec).unwrap();
        run.setup().unwrap();

        assert_eq!(run.state(), RunState::SetUp);
        assert_eq!(run.process_count().unwrap(), 1);
        let patched = fs::read_to_string(scratch.path().join("r").join("input.in")).unwrap();
        assert!(patched.starts_with("NSTEPS\n500\n"));
    }

    #[test]
    fn runs_the_bare_command_to_completion() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("tool.sh"), "#!/bin/sh\necho done\n").unwrap();
        fs::set_permissions(
            base.path().join("tool.sh"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

        let run_dir = scratch.path().join("r");
        let spec = RunSpec::new(base.path(), &run_dir, "./tool.sh", "input.in").launch_prefix("");
        let mut run = MinimalRun::new(spec).unwrap();
        run.setup().unwrap();
        run.execute(&ExecutionConfig::default()).unwrap();
        run.finish().unwrap();

        assert_eq!(run.state(), RunState::Finished);
        assert_eq!(fs::read_to_string(run_dir.join("run.out")).unwrap(), "done\n");
    }
}
