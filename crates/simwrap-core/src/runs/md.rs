use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::patch::{BlockInput, BlockLookup, Dialect};
use crate::platform::Platform;

use super::{
    CompletionMarker, ExecutionConfig, RunHarness, RunSpec, Runnable, copy_dir_recursive,
};

const POST_PROC_DIR: &str = "post_proc";
const PROCESSORS_KEYWORD: &str = "PROCESSORS";

const COMPLETION: CompletionMarker = CompletionMarker {
    text: "Time taken by code",
    tail: 10,
    elapsed: elapsed_field,
};

fn elapsed_field(line: &str) -> Option<&str> {
    line.split(';').nth(1)
}

/// A molecular-dynamics run with a block-dialect input file.
///
/// The process count comes from the three value lines under the
/// `PROCESSORS` block; a commented-out block means a serial run. Setup also
/// pre-creates `results/` and brings the base directory's post-processing
/// folder along when one exists.
pub struct MdRun {
    harness: RunHarness,
}

impl MdRun {
    pub fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            harness: RunHarness::new(spec)?,
        })
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.copy_post_processing();
        self.harness.copy_declared_files()?;
        self.harness.patch_inputs(Dialect::Block)?;
        let results = self.harness.run_dir().join(super::RESULTS_DIR);
        fs::create_dir_all(&results)
            .map_err(|source| self.harness.setup_error(source))?;
        Ok(())
    }

    fn copy_post_processing(&self) {
        let source = self.harness.spec.base_dir.join(POST_PROC_DIR);
        let destination = self.harness.run_dir().join(POST_PROC_DIR);
        if !source.is_dir() || destination.exists() {
            return;
        }
        if let Err(error) = copy_dir_recursive(&source, &destination) {
            warn!(
                run_dir = %self.harness.run_dir().display(),
                "could not copy post-processing folder: {error}"
            );
        }
    }
}

impl Runnable for MdRun {
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
        let input = BlockInput::new(self.harness.input_path());
        match input.read_block(PROCESSORS_KEYWORD, 3)? {
            BlockLookup::Values(values) => match parse_triple_product(&values) {
                Some(nprocs) => Ok(nprocs),
                None => {
                    warn!(
                        file = %self.harness.input_path().display(),
                        "malformed '{PROCESSORS_KEYWORD}' block, assuming a serial run"
                    );
                    Ok(1)
                }
            },
            BlockLookup::CommentedOut => Ok(1),
            BlockLookup::Missing => {
                warn!(
                    file = %self.harness.input_path().display(),
                    "no '{PROCESSORS_KEYWORD}' block, assuming a serial run"
                );
                Ok(1)
            }
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
        let mut arguments = format!("-i {}{}", file_prefix, self.harness.input_file());
        if let Some(start) = self.harness.spec.start_file.path() {
            arguments.push_str(&format!(" -r {}{}", file_prefix, start.display()));
        }
        arguments
    }
}

fn parse_triple_product(values: &[String]) -> Option<usize> {
    if values.len() != 3 {
        return None;
    }
    values
        .iter()
        .try_fold(1usize, |product, value| {
            value.trim().parse::<usize>().ok().map(|n| product * n)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeyValues, StartFile, Value};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_md_base(base: &Path) {
        fs::write(
            base.join("parallel_md.exe"),
            "#!/bin/sh\nexit 0\n",
        )
        .unwrap();
        fs::set_permissions(
            base.join("parallel_md.exe"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        fs::write(
            base.join("MD.in"),
            "DENSITY\n0.8\nPROCESSORS\n2\n2\n1\n",
        )
        .unwrap();
    }

    #[test]
    fn setup_copies_patches_and_creates_the_results_directory() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        write_md_base(base.path());
        let run_dir = scratch.path().join("density0p9");

        let spec = RunSpec::new(base.path(), &run_dir, "parallel_md.exe", "MD.in")
            .change("DENSITY", KeyValues::scalar(Value::Float(0.9)));
        let mut run = MdRun::new(spec).unwrap();
        run.setup().unwrap();

        assert_eq!(run.state(), RunState::SetUp);
        assert!(run_dir.join("results").is_dir());
        let patched = fs::read_to_string(run_dir.join("MD.in")).unwrap();
        assert!(patched.starts_with("DENSITY\n0.9\n"));
        // The base copy is untouched.
        let original = fs::read_to_string(base.path().join("MD.in")).unwrap();
        assert!(original.starts_with("DENSITY\n0.8\n"));
    }

    #[test]
    fn process_count_multiplies_the_processors_block() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        write_md_base(base.path());
        let spec = RunSpec::new(
            base.path(),
            scratch.path().join("r"),
            "parallel_md.exe",
            "MD.in",
        );
        let mut run = MdRun::new(spec).unwrap();
        run.setup().unwrap();
        assert_eq!(run.process_count().unwrap(), 4);
    }

    #[test]
    fn a_commented_processors_block_means_serial() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("md.exe"), "").unwrap();
        fs::write(
            base.path().join("MD.in"),
            "DENSITY\n0.8\n#PROCESSORS\n2\n2\n1\n",
        )
        .unwrap();
        let spec = RunSpec::new(base.path(), scratch.path().join("r"), "md.exe", "MD.in");
        let mut run = MdRun::new(spec).unwrap();
        run.setup().unwrap();
        assert_eq!(run.process_count().unwrap(), 1);
    }

    #[test]
    fn arguments_carry_the_restart_flag_and_prefix() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        write_md_base(base.path());
        fs::write(base.path().join("state.restart"), "state").unwrap();
        let spec = RunSpec::new(
            base.path(),
            scratch.path().join("r"),
            "parallel_md.exe",
            "MD.in",
        )
        .start_file(StartFile::Restart(PathBuf::from("state.restart")));
        let run = MdRun::new(spec).unwrap();

        assert_eq!(run.command_arguments(""), "-i MD.in -r state.restart");
        assert_eq!(
            run.command_arguments("./md_data/"),
            "-i ./md_data/MD.in -r ./md_data/state.restart"
        );
    }

    #[test]
    fn a_failing_executable_marks_the_run_failed() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        fs::write(base.path().join("fail.sh"), "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        fs::set_permissions(base.path().join("fail.sh"), fs::Permissions::from_mode(0o755))
            .unwrap();
        fs::write(base.path().join("MD.in"), "DENSITY\n0.8\n").unwrap();

        let spec = RunSpec::new(base.path(), scratch.path().join("r"), "./fail.sh", "MD.in")
            .launch_prefix("");
        let mut run = MdRun::new(spec).unwrap();
        run.setup().unwrap();
        let error = run.execute(&ExecutionConfig::default()).unwrap_err();
        assert_eq!(run.state(), RunState::Failed);
        assert!(error.to_string().contains("boom"));
    }
}
