//! Run lifecycle: a validated specification, directory setup, command
//! assembly through the platform launcher, local or batch execution, and
//! completion bookkeeping.
//!
//! Every simulator variant owns a [`RunHarness`] and drives it through the
//! same steps; the variants differ only in their input dialect, command
//! arguments, process-count source, and completion marker.

mod case;
mod cfd;
mod coupled;
mod lammps;
mod md;
mod minimal;
mod script;

pub use case::CaseRun;
pub use cfd::CfdRun;
pub use coupled::CoupledRun;
pub use lammps::LammpsRun;
pub use md::MdRun;
pub use minimal::MinimalRun;
pub use script::ScriptRun;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{
    ChangeSet, ConfigurationError, CopyMode, ExistsPolicy, KeyValues, RunError, RunResult,
    RunState, StartFile,
};
use crate::patch::Dialect;
use crate::platform::Platform;
use crate::process::{self, SpawnedProcess};
use crate::queue::{DEFAULT_POLL, PbsJob, QueueHandle};

const RESULTS_DIR: &str = "results";
const FINAL_STATE: &str = "final_state";
const REORDER_TOOL: &str = "reorder_restart";
const SOURCE_ARCHIVE: &str = "src.tar";

/// Post-run housekeeping, applied in declared order. Each action is
/// best-effort: a failure is logged and the remaining actions still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishAction {
    /// Move `<run_dir>/results/final_state` to the given destination.
    MoveFinalState { destination: PathBuf },
    /// Replace the destination with a copy of `<run_dir>/results`.
    CopyResultsDir { destination: PathBuf },
    /// Copy the reordering utility from the base directory into the run
    /// directory, reorder the named state file against the run input, and
    /// move the reordered output over the original.
    ReorderRestart { state_file: String },
    /// Invoke a post-processing executable with the results directory as
    /// its argument.
    RunScript { script: String },
}

/// How `execute` waits on the launched work.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Wait for the subprocess or queue job before returning.
    pub blocking: bool,
    /// Interval between queue polls while blocking on a scheduler job.
    pub poll: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            poll: DEFAULT_POLL,
        }
    }
}

impl ExecutionConfig {
    pub fn background() -> Self {
        Self {
            blocking: false,
            ..Self::default()
        }
    }
}

/// One run of an external simulator, from directory setup to completed
/// output. A run is never reused after `finish` (or after any step fails).
pub trait Runnable: Send {
    /// Create and populate the run directory, then patch the copied inputs.
    fn setup(&mut self) -> RunResult<()>;

    /// Assemble the command line and start it, locally or through the
    /// batch queue.
    fn execute(&mut self, config: &ExecutionConfig) -> RunResult<()>;

    /// Wait for any outstanding job, check the output for the completion
    /// marker, and apply the configured finish actions.
    fn finish(&mut self) -> RunResult<()>;

    /// Number of processes the patched input asks for.
    fn process_count(&self) -> RunResult<usize>;

    fn state(&self) -> RunState;

    fn run_dir(&self) -> &Path;

    fn platform(&self) -> Platform;

    /// Re-home the run directory, e.g. when a study regroups its runs or a
    /// coupled run claims a sub-directory per side.
    fn rebase(&mut self, run_dir: PathBuf);

    fn set_copy_mode(&mut self, mode: CopyMode);

    fn executable_name(&self) -> &str;

    /// Command arguments with every file name prefixed by `file_prefix`,
    /// so a coupled parent can address this run's files from its own
    /// directory.
    fn command_arguments(&self, _file_prefix: &str) -> String {
        String::new()
    }
}

/// Everything a run needs, validated before any directory is touched.
///
/// Required parameters come in through [`RunSpec::new`]; the rest default
/// to a local, blocking, full-copy run and are overridden by the chainable
/// setters.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub(crate) base_dir: PathBuf,
    pub(crate) run_dir: PathBuf,
    pub(crate) src_dir: Option<PathBuf>,
    pub(crate) executable: String,
    pub(crate) input_file: String,
    pub(crate) output_file: String,
    pub(crate) changes: ChangeSet,
    pub(crate) start_file: StartFile,
    pub(crate) extra_files: Vec<String>,
    pub(crate) finish_actions: Vec<FinishAction>,
    pub(crate) platform: Platform,
    pub(crate) job_name: String,
    pub(crate) walltime: String,
    pub(crate) queue: Option<String>,
    pub(crate) extra_directives: Vec<String>,
    pub(crate) queue_preamble: Vec<String>,
    pub(crate) build_command: Option<String>,
    pub(crate) launch_prefix: Option<String>,
    pub(crate) copy_mode: CopyMode,
    pub(crate) exists_policy: ExistsPolicy,
    pub(crate) dry_run: bool,
    pub(crate) delete_output: bool,
}

impl RunSpec {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        run_dir: impl Into<PathBuf>,
        executable: impl Into<String>,
        input_file: impl Into<String>,
    ) -> Self {
        let run_dir = run_dir.into();
        let job_name = run_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        Self {
            base_dir: base_dir.into(),
            run_dir,
            src_dir: None,
            executable: executable.into(),
            input_file: input_file.into(),
            output_file: "run.out".to_string(),
            changes: ChangeSet::new(),
            start_file: StartFile::None,
            extra_files: Vec::new(),
            finish_actions: Vec::new(),
            platform: Platform::default(),
            job_name,
            walltime: "24:00:00".to_string(),
            queue: None,
            extra_directives: Vec::new(),
            queue_preamble: Vec::new(),
            build_command: None,
            launch_prefix: None,
            copy_mode: CopyMode::default(),
            exists_policy: ExistsPolicy::default(),
            dry_run: false,
            delete_output: false,
        }
    }

    /// Specification for a coupled parent, which has no executable of its
    /// own: the two sides bring theirs.
    pub fn coupled(
        base_dir: impl Into<PathBuf>,
        run_dir: impl Into<PathBuf>,
        input_file: impl Into<String>,
    ) -> Self {
        Self::new(base_dir, run_dir, "", input_file)
    }

    pub fn src_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.src_dir = Some(dir.into());
        self
    }

    pub fn output_file(mut self, name: impl Into<String>) -> Self {
        self.output_file = name.into();
        self
    }

    pub fn change(mut self, keyword: impl Into<String>, values: KeyValues) -> Self {
        self.changes.insert(keyword, values);
        self
    }

    pub fn changes(mut self, changes: ChangeSet) -> Self {
        self.changes = changes;
        self
    }

    pub fn start_file(mut self, start_file: StartFile) -> Self {
        self.start_file = start_file;
        self
    }

    pub fn extra_file(mut self, name: impl Into<String>) -> Self {
        self.extra_files.push(name.into());
        self
    }

    pub fn finish_action(mut self, action: FinishAction) -> Self {
        self.finish_actions.push(action);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    pub fn walltime(mut self, walltime: impl Into<String>) -> Self {
        self.walltime = walltime.into();
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn extra_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }

    pub fn queue_preamble_line(mut self, line: impl Into<String>) -> Self {
        self.queue_preamble.push(line.into());
        self
    }

    /// Command run in the source directory when the executable is missing
    /// from the base directory and PATH.
    pub fn build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = Some(command.into());
        self
    }

    /// Override the platform's launcher prefix, e.g. for a nonstandard MPI
    /// install. An empty prefix runs the executable bare, which serial
    /// utilities and post-processing scripts want.
    pub fn launch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.launch_prefix = Some(prefix.into());
        self
    }

    pub fn copy_mode(mut self, mode: CopyMode) -> Self {
        self.copy_mode = mode;
        self
    }

    pub fn exists_policy(mut self, policy: ExistsPolicy) -> Self {
        self.exists_policy = policy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn delete_output(mut self, delete_output: bool) -> Self {
        self.delete_output = delete_output;
        self
    }
}

/// How the run output announces completion, and where the elapsed time
/// hides on the marker line.
pub(crate) struct CompletionMarker {
    pub(crate) text: &'static str,
    pub(crate) tail: usize,
    pub(crate) elapsed: fn(&str) -> Option<&str>,
}

#[derive(Debug)]
enum ResolvedExecutable {
    InBaseDir,
    OnPath,
}

#[derive(Debug)]
enum ActiveJob {
    Idle,
    Local(SpawnedProcess),
    Queued(QueueHandle),
}

/// The shared run engine. Variants call into it step by step; it owns the
/// spec, the lifecycle state, and whatever job is currently in flight.
#[derive(Debug)]
pub(crate) struct RunHarness {
    pub(crate) spec: RunSpec,
    resolved: ResolvedExecutable,
    state: RunState,
    active: ActiveJob,
}

impl RunHarness {
    pub(crate) fn new(spec: RunSpec) -> Result<Self, ConfigurationError> {
        check_directories(&spec)?;
        let resolved = resolve_executable(&spec)?;
        Self::with_resolved(spec, resolved)
    }

    /// Validation for a coupled parent: everything but the executable,
    /// which the sides carry themselves.
    pub(crate) fn without_executable(spec: RunSpec) -> Result<Self, ConfigurationError> {
        check_directories(&spec)?;
        Self::with_resolved(spec, ResolvedExecutable::OnPath)
    }

    fn with_resolved(
        spec: RunSpec,
        resolved: ResolvedExecutable,
    ) -> Result<Self, ConfigurationError> {
        if !spec.base_dir.join(&spec.input_file).exists() {
            return Err(ConfigurationError::MissingInput {
                name: spec.input_file.clone(),
                base_dir: spec.base_dir.clone(),
            });
        }
        if let Some(start) = spec.start_file.path() {
            if !spec.base_dir.join(start).is_file() {
                return Err(ConfigurationError::MissingInput {
                    name: start.display().to_string(),
                    base_dir: spec.base_dir.clone(),
                });
            }
        }
        for extra in &spec.extra_files {
            if !spec.base_dir.join(extra).is_file() {
                return Err(ConfigurationError::MissingExtraFile {
                    name: extra.clone(),
                    base_dir: spec.base_dir.clone(),
                });
            }
        }
        Ok(Self {
            spec,
            resolved,
            state: RunState::Created,
            active: ActiveJob::Idle,
        })
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn run_dir(&self) -> &Path {
        &self.spec.run_dir
    }

    pub(crate) fn platform(&self) -> Platform {
        self.spec.platform
    }

    pub(crate) fn input_file(&self) -> &str {
        &self.spec.input_file
    }

    pub(crate) fn input_path(&self) -> PathBuf {
        self.spec.run_dir.join(&self.spec.input_file)
    }

    pub(crate) fn dry_run(&self) -> bool {
        self.spec.dry_run
    }

    pub(crate) fn rebase(&mut self, run_dir: PathBuf) {
        debug!(
            from = %self.spec.run_dir.display(),
            to = %run_dir.display(),
            "re-homing run directory"
        );
        self.spec.run_dir = run_dir;
    }

    pub(crate) fn set_copy_mode(&mut self, mode: CopyMode) {
        self.spec.copy_mode = mode;
    }

    /// Record the outcome of a lifecycle step: success advances the state
    /// machine, failure parks the run in `Failed`.
    pub(crate) fn advance(&mut self, result: RunResult<()>, reached: RunState) -> RunResult<()> {
        match result {
            Ok(()) => {
                self.state = reached;
                Ok(())
            }
            Err(error) => {
                self.state = RunState::Failed;
                Err(error)
            }
        }
    }

    pub(crate) fn setup_error(&self, source: std::io::Error) -> RunError {
        RunError::Setup {
            run_dir: self.spec.run_dir.clone(),
            source,
        }
    }

    pub(crate) fn create_run_dir(&self) -> RunResult<()> {
        if self.spec.run_dir.exists() {
            match self.spec.exists_policy {
                ExistsPolicy::Fail => {
                    return Err(ConfigurationError::RunDirExists {
                        path: self.spec.run_dir.clone(),
                    }
                    .into());
                }
                ExistsPolicy::Continue => {
                    warn!(
                        run_dir = %self.spec.run_dir.display(),
                        "run directory already exists, files may be overwritten"
                    );
                }
            }
        }
        fs::create_dir_all(&self.spec.run_dir).map_err(|source| self.setup_error(source))?;
        debug!(run_dir = %self.spec.run_dir.display(), "created run directory");
        Ok(())
    }

    /// Archive a snapshot of the source tree into the run directory, so the
    /// run records the code that produced it. Skipped in minimal-copy mode;
    /// failures only warn.
    pub(crate) fn snapshot_source(&self) {
        if matches!(self.spec.copy_mode, CopyMode::Minimal) {
            return;
        }
        let Some(src_dir) = &self.spec.src_dir else {
            return;
        };
        let command = format!("tar -cf {} -C '{}' .", SOURCE_ARCHIVE, src_dir.display());
        if let Err(error) = process::run_captured(&command, &self.spec.run_dir) {
            warn!(
                run_dir = %self.spec.run_dir.display(),
                "source snapshot failed: {error}"
            );
        }
    }

    /// Copy the executable, input, start file, and extra files from the
    /// base directory into the run directory. Directories are replaced
    /// recursively; in minimal-copy mode the executable becomes a symlink.
    pub(crate) fn copy_declared_files(&self) -> RunResult<()> {
        for name in self.copy_targets() {
            let source = self.spec.base_dir.join(&name);
            let destination = self.spec.run_dir.join(&name);
            if is_same_file(&source, &destination) {
                continue;
            }
            if name == self.spec.executable && matches!(self.spec.copy_mode, CopyMode::Minimal) {
                self.link_executable(&source, &destination)?;
                continue;
            }
            copy_entry(&source, &destination).map_err(|source| self.setup_error(source))?;
        }
        Ok(())
    }

    fn copy_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        if !self.spec.executable.is_empty()
            && matches!(self.resolved, ResolvedExecutable::InBaseDir)
        {
            targets.push(self.spec.executable.clone());
        }
        if self.spec.input_file != self.spec.executable {
            targets.push(self.spec.input_file.clone());
        }
        if let Some(start) = self.spec.start_file.path() {
            targets.push(start.to_string_lossy().into_owned());
        }
        targets.extend(self.spec.extra_files.iter().cloned());
        targets
    }

    fn link_executable(&self, source: &Path, destination: &Path) -> RunResult<()> {
        let target = fs::canonicalize(source).map_err(|source| self.setup_error(source))?;
        if destination.symlink_metadata().is_ok() {
            fs::remove_file(destination).map_err(|source| self.setup_error(source))?;
        }
        std::os::unix::fs::symlink(&target, destination)
            .map_err(|source| self.setup_error(source))
    }

    /// Apply every configured change to the run-directory input through the
    /// given dialect.
    pub(crate) fn patch_inputs(&self, dialect: Dialect) -> RunResult<()> {
        if self.spec.changes.is_empty() {
            return Ok(());
        }
        let input = self.input_path();
        for (keyword, values) in self.spec.changes.iter() {
            let outcome = dialect.replace(&input, keyword, values)?;
            debug!(
                file = %input.display(),
                keyword,
                outcome = ?outcome,
                "patched input"
            );
        }
        Ok(())
    }

    pub(crate) fn assemble_command(&self, nprocs: usize, arguments: &str) -> String {
        let executable = python_wrapped(&self.spec.executable);
        let prefix = match &self.spec.launch_prefix {
            Some(prefix) => prefix.clone(),
            None => self.spec.platform.launch_prefix(nprocs),
        };
        let mut command = if prefix.is_empty() {
            executable
        } else {
            format!("{prefix} {executable}")
        };
        if !arguments.is_empty() {
            command.push(' ');
            command.push_str(arguments);
        }
        command
    }

    /// Assemble and start the run command for this many processes.
    pub(crate) fn launch(
        &mut self,
        nprocs: usize,
        arguments: &str,
        config: &ExecutionConfig,
    ) -> RunResult<()> {
        let command = self.assemble_command(nprocs, arguments);
        self.launch_command(&command, nprocs, config)
    }

    /// Start a fully assembled command line, either locally with redirected
    /// output or through the batch queue.
    pub(crate) fn launch_command(
        &mut self,
        command: &str,
        nprocs: usize,
        config: &ExecutionConfig,
    ) -> RunResult<()> {
        if self.spec.platform.uses_scheduler() {
            self.launch_queued(command, nprocs, config)
        } else {
            self.launch_local(command, config)
        }
    }

    fn launch_local(&mut self, command: &str, config: &ExecutionConfig) -> RunResult<()> {
        if self.spec.dry_run {
            info!(
                run_dir = %self.spec.run_dir.display(),
                command,
                "dry run, not spawning"
            );
            return Ok(());
        }
        let child = process::spawn_redirected(command, &self.spec.run_dir, &self.spec.output_file)?;
        info!(
            pid = child.id(),
            run_dir = %self.spec.run_dir.display(),
            command,
            "spawned"
        );
        self.active = ActiveJob::Local(child);
        if config.blocking {
            self.wait_active(config.poll)?;
        }
        Ok(())
    }

    fn launch_queued(
        &mut self,
        command: &str,
        nprocs: usize,
        config: &ExecutionConfig,
    ) -> RunResult<()> {
        let mut job = PbsJob::new(
            self.spec.run_dir.clone(),
            self.spec.job_name.as_str(),
            nprocs,
            self.spec.walltime.as_str(),
            command,
        );
        if let Some(queue) = &self.spec.queue {
            job = job.queue(queue.as_str());
        }
        for directive in &self.spec.extra_directives {
            job = job.extra_directive(directive.as_str());
        }
        for line in &self.spec.queue_preamble {
            job = job.preamble_line(line.as_str());
        }
        let script = job.write_script().map_err(|source| self.setup_error(source))?;
        if let Some(handle) = job.submit(&script, self.spec.dry_run)? {
            self.active = ActiveJob::Queued(handle);
            if config.blocking {
                self.wait_active(config.poll)?;
            }
        }
        Ok(())
    }

    /// Wait for whatever is in flight. Idle is a successful wait, so
    /// `finish` can call this unconditionally.
    pub(crate) fn wait_active(&mut self, poll: Duration) -> RunResult<()> {
        match std::mem::replace(&mut self.active, ActiveJob::Idle) {
            ActiveJob::Idle => Ok(()),
            ActiveJob::Local(child) => child.wait().map_err(RunError::from),
            ActiveJob::Queued(handle) => handle.wait(poll).map_err(RunError::from),
        }
    }

    /// The shared tail of `finish`: wait for the job, check the completion
    /// marker, apply finish actions. Dry runs skip everything after the
    /// wait.
    pub(crate) fn finish_with(&mut self, marker: Option<&CompletionMarker>) -> RunResult<()> {
        self.wait_active(DEFAULT_POLL)?;
        if self.spec.dry_run {
            debug!(run_dir = %self.spec.run_dir.display(), "dry run, nothing to finish");
            return Ok(());
        }
        if let Some(marker) = marker {
            self.scan_completion(marker);
        }
        self.run_finish_actions();
        Ok(())
    }

    fn scan_completion(&self, marker: &CompletionMarker) {
        let stdout_path = self.spec.run_dir.join(&self.spec.output_file);
        let tail = process::tail_lines(&stdout_path, marker.tail);
        for line in tail.lines() {
            if line.contains(marker.text) {
                match (marker.elapsed)(line) {
                    Some(elapsed) => info!(
                        run_dir = %self.spec.run_dir.display(),
                        elapsed = elapsed.trim(),
                        "run finished cleanly"
                    ),
                    None => info!(
                        run_dir = %self.spec.run_dir.display(),
                        "run finished cleanly"
                    ),
                }
                return;
            }
        }
        warn!(
            run_dir = %self.spec.run_dir.display(),
            "'{}' missing from the last {} lines of '{}', run may not have completed",
            marker.text,
            marker.tail,
            self.spec.output_file
        );
        let stderr_tail = process::tail_lines(&self.stderr_path(), 10);
        if !stderr_tail.is_empty() {
            warn!(
                run_dir = %self.spec.run_dir.display(),
                "stderr tail:\n{stderr_tail}"
            );
        }
    }

    fn stderr_path(&self) -> PathBuf {
        self.spec
            .run_dir
            .join(format!("{}_err", self.spec.output_file))
    }

    fn run_finish_actions(&self) {
        for action in &self.spec.finish_actions {
            match self.apply_finish_action(action) {
                Ok(()) => debug!(run_dir = %self.spec.run_dir.display(), ?action, "finish action applied"),
                Err(error) => warn!(
                    run_dir = %self.spec.run_dir.display(),
                    "finish action {action:?} failed: {error}"
                ),
            }
        }
        if self.spec.delete_output {
            match fs::remove_dir_all(&self.spec.run_dir) {
                Ok(()) => info!(run_dir = %self.spec.run_dir.display(), "removed run directory"),
                Err(error) => warn!(
                    run_dir = %self.spec.run_dir.display(),
                    "failed to remove run directory: {error}"
                ),
            }
        }
    }

    fn apply_finish_action(&self, action: &FinishAction) -> std::io::Result<()> {
        let results = self.spec.run_dir.join(RESULTS_DIR);
        match action {
            FinishAction::MoveFinalState { destination } => {
                fs::rename(results.join(FINAL_STATE), destination)
            }
            FinishAction::CopyResultsDir { destination } => {
                if destination.is_dir() {
                    fs::remove_dir_all(destination)?;
                }
                copy_dir_recursive(&results, destination)
            }
            FinishAction::ReorderRestart { state_file } => {
                let tool = self.spec.base_dir.join(REORDER_TOOL);
                fs::copy(&tool, self.spec.run_dir.join(REORDER_TOOL))?;
                let command = format!(
                    "./{} -r '{}' -i '{}'",
                    REORDER_TOOL, state_file, self.spec.input_file
                );
                process::run_captured(&command, &self.spec.run_dir)
                    .map_err(std::io::Error::other)?;
                fs::rename(
                    self.spec.run_dir.join("final_state2"),
                    self.spec.run_dir.join(state_file),
                )
            }
            FinishAction::RunScript { script } => {
                let command = format!("{} '{}'", script, results.display());
                process::run_captured(&command, &self.spec.run_dir)
                    .map_err(std::io::Error::other)?;
                Ok(())
            }
        }
    }
}

fn check_directories(spec: &RunSpec) -> Result<(), ConfigurationError> {
    if !spec.base_dir.is_dir() {
        return Err(ConfigurationError::NotADirectory {
            role: "base directory",
            path: spec.base_dir.clone(),
        });
    }
    if let Some(src_dir) = &spec.src_dir {
        if !src_dir.is_dir() {
            return Err(ConfigurationError::NotADirectory {
                role: "source directory",
                path: src_dir.clone(),
            });
        }
    }
    Ok(())
}

fn resolve_executable(spec: &RunSpec) -> Result<ResolvedExecutable, ConfigurationError> {
    if spec.base_dir.join(&spec.executable).is_file() {
        return Ok(ResolvedExecutable::InBaseDir);
    }
    if find_on_path(&spec.executable).is_some() {
        debug!(executable = spec.executable.as_str(), "resolved on PATH");
        return Ok(ResolvedExecutable::OnPath);
    }
    if let (Some(build), Some(src_dir)) = (&spec.build_command, &spec.src_dir) {
        info!(
            executable = spec.executable.as_str(),
            build = build.as_str(),
            "executable not found, attempting build"
        );
        if let Err(error) = process::run_captured(build, src_dir) {
            warn!("build failed: {error}");
        }
        if spec.base_dir.join(&spec.executable).is_file() {
            return Ok(ResolvedExecutable::InBaseDir);
        }
    }
    Err(ConfigurationError::MissingExecutable {
        name: spec.executable.clone(),
        base_dir: spec.base_dir.clone(),
    })
}

fn find_on_path(executable: &str) -> Option<PathBuf> {
    if executable.is_empty() || executable.contains('/') {
        return None;
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

/// Python scripts are run through the interpreter rather than relying on a
/// shebang in the copied file.
fn python_wrapped(executable: &str) -> String {
    if executable.ends_with(".py") {
        format!("python {executable}")
    } else {
        executable.to_string()
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_entry(source: &Path, destination: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        if destination.is_dir() {
            fs::remove_dir_all(destination)?;
        }
        copy_dir_recursive(source, destination)
    } else {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, destination)?;
        Ok(())
    }
}

pub(crate) fn copy_dir_recursive(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_base(dir: &Path) {
        fs::write(dir.join("a.out"), "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(dir.join("a.out"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.join("input.in"), "DENSITY\n0.8\n").unwrap();
    }

    fn spec_for(base: &TempDir, run: &TempDir) -> RunSpec {
        RunSpec::new(
            base.path(),
            run.path().join("run1"),
            "a.out",
            "input.in",
        )
    }

    #[test]
    fn validation_rejects_a_missing_base_directory() {
        let run = TempDir::new().unwrap();
        let spec = RunSpec::new("/nonexistent/base", run.path().join("r"), "a.out", "in");
        let error = RunHarness::new(spec).unwrap_err();
        assert!(matches!(
            error,
            ConfigurationError::NotADirectory { role: "base directory", .. }
        ));
    }

    #[test]
    fn validation_rejects_a_missing_executable_but_accepts_one_on_path() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(base.path().join("input.in"), "DENSITY\n0.8\n").unwrap();

        let missing = RunSpec::new(base.path(), run.path().join("r"), "no_such.exe", "input.in");
        assert!(matches!(
            RunHarness::new(missing).unwrap_err(),
            ConfigurationError::MissingExecutable { .. }
        ));

        // `sh` is always resolvable on PATH.
        let on_path = RunSpec::new(base.path(), run.path().join("r"), "sh", "input.in");
        let harness = RunHarness::new(on_path).unwrap();
        assert!(matches!(harness.resolved, ResolvedExecutable::OnPath));
        assert_eq!(harness.state(), RunState::Created);
    }

    #[test]
    fn validation_rejects_missing_extra_files() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        write_base(base.path());
        let spec = spec_for(&base, &run).extra_file("missing.dat");
        assert!(matches!(
            RunHarness::new(spec).unwrap_err(),
            ConfigurationError::MissingExtraFile { .. }
        ));
    }

    #[test]
    fn exists_policy_gates_reusing_a_run_directory() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        write_base(base.path());
        fs::create_dir_all(run.path().join("run1")).unwrap();

        let failing = spec_for(&base, &run).exists_policy(ExistsPolicy::Fail);
        let harness = RunHarness::new(failing).unwrap();
        assert!(matches!(
            harness.create_run_dir().unwrap_err(),
            RunError::Configuration(ConfigurationError::RunDirExists { .. })
        ));

        let continuing = spec_for(&base, &run);
        let harness = RunHarness::new(continuing).unwrap();
        harness.create_run_dir().unwrap();
    }

    #[test]
    fn minimal_copy_links_the_executable_and_copies_the_input() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        write_base(base.path());
        let spec = spec_for(&base, &run).copy_mode(CopyMode::Minimal);
        let harness = RunHarness::new(spec).unwrap();
        harness.create_run_dir().unwrap();
        harness.copy_declared_files().unwrap();

        let run_dir = run.path().join("run1");
        let link = run_dir.join("a.out");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_to_string(run_dir.join("input.in")).unwrap(),
            "DENSITY\n0.8\n"
        );
    }

    #[test]
    fn commands_embed_the_launcher_and_wrap_python_scripts() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        write_base(base.path());
        let harness = RunHarness::new(spec_for(&base, &run)).unwrap();
        assert_eq!(
            harness.assemble_command(4, "-i input.in"),
            "mpiexec -n 4 a.out -i input.in"
        );

        fs::write(base.path().join("post.py"), "print('ok')\n").unwrap();
        let spec = RunSpec::new(base.path(), run.path().join("r2"), "post.py", "input.in");
        let harness = RunHarness::new(spec).unwrap();
        assert_eq!(
            harness.assemble_command(1, ""),
            "mpiexec -n 1 python post.py"
        );

        let bare = spec_for(&base, &run).launch_prefix("");
        let harness = RunHarness::new(bare).unwrap();
        assert_eq!(harness.assemble_command(4, "-i input.in"), "a.out -i input.in");
    }

    #[test]
    fn move_final_state_relocates_the_results_file() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        write_base(base.path());
        let destination = run.path().join("state.end");
        let spec = spec_for(&base, &run).finish_action(FinishAction::MoveFinalState {
            destination: destination.clone(),
        });
        let harness = RunHarness::new(spec).unwrap();
        harness.create_run_dir().unwrap();
        let results = harness.run_dir().join(RESULTS_DIR);
        fs::create_dir_all(&results).unwrap();
        fs::write(results.join(FINAL_STATE), "binary state").unwrap();

        harness.run_finish_actions();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "binary state");
        assert!(!results.join(FINAL_STATE).exists());
    }

    #[test]
    fn copy_targets_skip_a_path_resolved_executable() {
        let base = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(base.path().join("input.in"), "x\n").unwrap();
        let spec = RunSpec::new(base.path(), run.path().join("r"), "sh", "input.in");
        let harness = RunHarness::new(spec).unwrap();
        assert_eq!(harness.copy_targets(), vec!["input.in".to_string()]);
    }
}
