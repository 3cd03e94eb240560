use crate::platform::Platform;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Construction-time validation failures. These abort a run (or a whole
/// study) before any directory is created or file touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{role} '{}' is not a directory", path.display())]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("input '{name}' not found under '{}'", base_dir.display())]
    MissingInput { name: String, base_dir: PathBuf },

    #[error(
        "executable '{name}' not found under '{}', on PATH, or via a build step",
        base_dir.display()
    )]
    MissingExecutable { name: String, base_dir: PathBuf },

    #[error("extra file '{name}' not found under '{}'", base_dir.display())]
    MissingExtraFile { name: String, base_dir: PathBuf },

    #[error("both an initial-state file and a restart file were given")]
    ConflictingStartFiles,

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("task limiter capacity must be at least 1")]
    ZeroLimiterCapacity,

    #[error("run sequences target mixed platforms: {expected} and {found}")]
    MixedPlatforms { expected: Platform, found: Platform },

    #[error("run directory '{}' already exists", path.display())]
    RunDirExists { path: PathBuf },

    #[error("cannot pair sweeps of {left} and {right} points")]
    SweepShapeMismatch { left: usize, right: usize },
}

/// Failures while patching an input file. Missing keywords are deliberately
/// not represented here: the replacers report them as soft outcomes and log
/// a warning instead.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("input file '{}' not found: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported replacement value for keyword '{keyword}': {reason}")]
    UnsupportedValueType {
        keyword: String,
        reason: &'static str,
    },

    #[error("unbalanced structure in '{}' near line {line}", path.display())]
    Structure { path: PathBuf, line: usize },

    #[error("no dictionary file named '{name}' under '{}'", case_dir.display())]
    UnknownDictFile { name: String, case_dir: PathBuf },

    #[error("failed to rewrite '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Failures launching or waiting on an external process or queue job.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn '{command}' in '{}': {source}", run_dir.display())]
    Spawn {
        command: String,
        run_dir: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to capture output to '{}': {source}", path.display())]
    OutputCapture {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "'{command}' exited with {status} in '{}'\n{stderr_tail}",
        run_dir.display()
    )]
    NonZeroExit {
        command: String,
        status: ExitStatus,
        run_dir: PathBuf,
        stderr_tail: String,
    },

    #[error("queue submission '{command}' failed: {detail}")]
    Submission { command: String, detail: String },
}

/// Umbrella error for the run lifecycle, with the exit-code mapping the CLI
/// reports to callers.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("setup failed in '{}': {source}", run_dir.display())]
    Setup {
        run_dir: PathBuf,
        source: std::io::Error,
    },
}

impl RunError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Patch(_) | Self::Setup { .. } => 3,
            Self::Execution(_) => 4,
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;
