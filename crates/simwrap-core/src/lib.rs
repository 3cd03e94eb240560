//! Core library for driving parameter studies over external simulation
//! codes: keyword patching of input files, structured case-dictionary
//! rewriting, run setup and execution, and study-level orchestration.

pub mod casedict;
pub mod domain;
pub mod manifest;
pub mod patch;
pub mod platform;
pub mod process;
pub mod queue;
pub mod runs;
pub mod study;
pub mod sweep;

pub use casedict::CaseDict;
pub use domain::{
    ChangeSet, ConfigurationError, DictChange, DictChangeMap, ExecutionError, KeyValues,
    PatchError, RowChange, RunError, RunResult, RunState, StartFile, Value,
};
pub use patch::{Dialect, ReplaceOutcome};
pub use platform::Platform;
pub use runs::{ExecutionConfig, FinishAction, RunSpec, Runnable};
pub use study::{Study, StudyReport, TaskLimiter};
pub use sweep::SweepSet;
