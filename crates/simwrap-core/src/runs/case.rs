use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::casedict::CaseDict;
use crate::domain::{ConfigurationError, CopyMode, RunResult, RunState};
use crate::platform::Platform;

use super::{CompletionMarker, ExecutionConfig, RunHarness, RunSpec, Runnable};

const COMPLETION: CompletionMarker = CompletionMarker {
    text: "ExecutionTime",
    tail: 10,
    elapsed: elapsed_field,
};

fn elapsed_field(line: &str) -> Option<&str> {
    line.split_whitespace().nth(2)
}

/// A run whose input is a whole case directory of structured dictionaries
/// rather than a single file.
///
/// Changes are applied through the case-dictionary rewriter, so the
/// mesh-domain shortcuts (`cell`, `process`, `origin`, `domainsize`) work
/// alongside fully-spelled nested changes. The process count is whatever
/// the decomposition dictionary asks for after patching.
pub struct CaseRun {
    harness: RunHarness,
    case: Option<CaseDict>,
}

impl CaseRun {
    pub fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            harness: RunHarness::new(spec)?,
            case: None,
        })
    }

    /// The parsed run-directory case, available once setup has run.
    pub fn case(&self) -> Option<&CaseDict> {
        self.case.as_ref()
    }

    fn setup_inner(&mut self) -> RunResult<()> {
        self.harness.create_run_dir()?;
        self.harness.snapshot_source();
        self.harness.copy_declared_files()?;
        let mut case = CaseDict::read(self.harness.input_path())?;
        for (keyword, values) in self.harness.spec.changes.iter() {
            let substituted = case.apply(keyword, values)?;
            debug!(
                case_dir = %self.harness.input_path().display(),
                keyword,
                substituted,
                "patched case dictionaries"
            );
        }
        self.case = Some(case);
        Ok(())
    }

    fn decomposition_count(&self) -> RunResult<usize> {
        let count = match &self.case {
            Some(case) => case.process_count(),
            None => CaseDict::read(self.harness.input_path())?.process_count(),
        };
        match count {
            Some(nprocs) => Ok(nprocs),
            None => {
                warn!(
                    case_dir = %self.harness.input_path().display(),
                    "no decomposition dictionary process count, assuming a serial run"
                );
                Ok(1)
            }
        }
    }
}

impl Runnable for CaseRun {
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
        self.decomposition_count()
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
        self.case = None;
    }

    fn set_copy_mode(&mut self, mode: CopyMode) {
        self.harness.set_copy_mode(mode);
    }

    fn executable_name(&self) -> &str {
        &self.harness.spec.executable
    }

    fn command_arguments(&self, file_prefix: &str) -> String {
        format!("-case {}{} -parallel", file_prefix, self.harness.input_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeyValues, Value};
    use std::fs;
    use tempfile::TempDir;

    const DECOMPOSE: &str = "\
numberOfSubdomains    4;

method                simple;

simpleCoeffs
{
    n               (2 2 1);
    delta           0.001;
}
";

    fn write_case_base(base: &Path) {
        fs::write(base.join("solver.exe"), "").unwrap();
        let case = base.join("openfoam");
        fs::create_dir_all(case.join("system")).unwrap();
        fs::create_dir_all(case.join("constant")).unwrap();
        fs::write(case.join("system/decomposeParDict"), DECOMPOSE).unwrap();
        fs::write(
            case.join("constant/transportProperties"),
            "nu              nu [ 0 2 -1 0 0 0 0 ] 1e-02;\n",
        )
        .unwrap();
    }

    #[test]
    fn setup_copies_the_case_directory_and_applies_the_process_shortcut() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        write_case_base(base.path());

        let spec = RunSpec::new(
            base.path(),
            scratch.path().join("r"),
            "solver.exe",
            "openfoam",
        )
        .change("process", KeyValues::list([2i64, 2, 2]));
        let mut run = CaseRun::new(spec).unwrap();
        run.setup().unwrap();

        assert_eq!(run.process_count().unwrap(), 8);
        let rewritten = fs::read_to_string(
            run.run_dir().join("openfoam/system/decomposeParDict"),
        )
        .unwrap();
        assert!(rewritten.contains("numberOfSubdomains    8;"));
        assert!(rewritten.contains("n               (2 2 2);"));
        // The base case is untouched.
        let original =
            fs::read_to_string(base.path().join("openfoam/system/decomposeParDict")).unwrap();
        assert!(original.contains("numberOfSubdomains    4;"));
        assert_eq!(run.command_arguments(""), "-case openfoam -parallel");
    }

    #[test]
    fn a_fully_spelled_nested_change_reaches_the_dictionary() {
        let base = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        write_case_base(base.path());

        let spec = RunSpec::new(
            base.path(),
            scratch.path().join("r"),
            "solver.exe",
            "openfoam",
        )
        .change(
            "decomposeParDict",
            KeyValues::Mapping(
                [(
                    "method".to_string(),
                    crate::domain::DictChange::Scalar(Value::Text("scotch".to_string())),
                )]
                .into_iter()
                .collect(),
            ),
        );
        let mut run = CaseRun::new(spec).unwrap();
        run.setup().unwrap();

        let rewritten = fs::read_to_string(
            run.run_dir().join("openfoam/system/decomposeParDict"),
        )
        .unwrap();
        assert!(rewritten.contains("scotch;"));
        assert!(!rewritten.contains("simple;"));
    }
}
