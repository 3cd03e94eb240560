use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::Dialect;
use crate::platform::Platform;

use super::{ExecutionConfig, RunHarness, RunSpec, Runnable};

const MD_DATA: &str = "md_data";
const CFD_DATA: &str = "cfd_data";

/// A coupled MD/CFD run: two sub-runs sharing one run directory and one
/// launcher invocation.
///
/// The parent owns the coupler input file (block dialect) and the command
/// line; each side keeps its own dialect, process count, and finish
/// behavior. Side run directories are re-homed to `md_data/` and
/// `cfd_data/` under the parent before setup.
pub struct CoupledRun {
    harness: RunHarness,
    md: Box<dyn Runnable>,
    cfd: Box<dyn Runnable>,
}

impl CoupledRun {
    pub fn new(
        spec: RunSpec,
        mut md: Box<dyn Runnable>,
        mut cfd: Box<dyn Runnable>,
    ) -> Result<Self, ConfigurationError> {
        for side in [&*md, &*cfd] {
            if side.platform() != spec.platform {
                return Err(ConfigurationError::MixedPlatforms {
                    expected: spec.platform,
                    found: side.platform(),
                });
            }
        }
        let harness = RunHarness::without_executable(spec)?;
        md.rebase(harness.run_dir().join(MD_DATA));
        cfd.rebase(harness.run_dir().join(CFD_DATA));
        Ok(Self { harness, md, cfd })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        self.harness.patch_inputs(Dialect::Block)?;
        self.md.setup()?;
        self.cfd.setup()?;
        Ok(())
    }

    /// The full coupled command: each side's executable and arguments
    /// addressed through its sub-directory, assembled by the platform's
    /// coupled launcher shape.
    fn command_line(&self) -> RunResult<(String, usize)> {
        let md_nprocs = self.md.process_count()?;
        let cfd_nprocs = self.cfd.process_count()?;
        let md_command = side_command(&*self.md, MD_DATA);
        let cfd_command = side_command(&*self.cfd, CFD_DATA);
        let command = self.harness.platform().coupled_command(
            md_nprocs,
            &md_command,
            cfd_nprocs,
            &cfd_command,
        );
        debug!(command, "assembled coupled command");
        Ok((command, md_nprocs + cfd_nprocs))
    }
}

/// One side of the coupled command, run from the parent directory. The
/// executable is addressed inside the sub-directory when it was copied
/// there; a PATH-resolved executable stays bare.
fn side_command(side: &dyn Runnable, sub_dir: &str) -> String {
    let name = side.executable_name().trim_start_matches("./");
    let prefix = format!("./{sub_dir}/");
    let executable = if side.run_dir().join(name).is_file() {
        format!("{prefix}{name}")
    } else {
        name.to_string()
    };
    let arguments = side.command_arguments(&prefix);
    if arguments.is_empty() {
        executable
    } else {
        format!("{executable} {arguments}")
    }
}

impl Runnable for CoupledRun {
    fn setup(&mut self) -> RunResult<()> {
        let result = self.setup_inner();
        self.harness.advance(result, RunState::SetUp)
    }

    fn execute(&mut self, config: &ExecutionConfig) -> RunResult<()> {
        let result = self.command_line().and_then(|(command, nprocs)| {
            self.harness.launch_command(&command, nprocs, config)
        });
        self.harness.advance(result, RunState::Executing)
    }

    fn finish(&mut self) -> RunResult<()> {
        let result = self.harness.finish_with(None).and_then(|()| {
            self.md.finish()?;
            self.cfd.finish()
        });
        self.harness.advance(result, RunState::Finished)
    }

    fn process_count(&self) -> RunResult<usize> {
        Ok(self.md.process_count()? + self.cfd.process_count()?)
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
        self.md.rebase(self.harness.run_dir().join(MD_DATA));
        self.cfd.rebase(self.harness.run_dir().join(CFD_DATA));
    }

    fn set_copy_mode(&mut self, mode: CopyMode) {
        self.harness.set_copy_mode(mode);
        self.md.set_copy_mode(mode);
        self.cfd.set_copy_mode(mode);
    }

    fn executable_name(&self) -> &str {
        &self.harness.spec.executable
    }
}
