//! Study-level orchestration: many run sequences, one concurrency bound.
//!
//! Each sequence owns a worker thread and executes its runs strictly in
//! order; the [`TaskLimiter`] caps how many runs across all sequences hold
//! the executing slot at once. A failing run stops its own sequence and
//! nothing else.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{error, info};

use crate::domain::{ConfigurationError, CopyMode, RunError};
use crate::platform::Platform;
use crate::runs::{ExecutionConfig, Runnable};

/// A counting semaphore over run slots. `bounded(n)` admits at most `n`
/// concurrent holders; `unbounded()` never blocks, for platforms where the
/// scheduler owns the machine-level bound.
#[derive(Debug)]
pub struct TaskLimiter {
    capacity: Option<usize>,
    held: Mutex<usize>,
    freed: Condvar,
}

impl TaskLimiter {
    pub fn bounded(capacity: usize) -> Result<Self, ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::ZeroLimiterCapacity);
        }
        Ok(Self {
            capacity: Some(capacity),
            held: Mutex::new(0),
            freed: Condvar::new(),
        })
    }

    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            held: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Blocks until a slot is free and takes it. The slot is released when
    /// the returned guard drops. No fairness guarantee.
    pub fn acquire(&self) -> SlotGuard<'_> {
        if let Some(capacity) = self.capacity {
            let mut held = self.held.lock().expect("limiter lock poisoned");
            while *held >= capacity {
                held = self.freed.wait(held).expect("limiter lock poisoned");
            }
            *held += 1;
        }
        SlotGuard { limiter: self }
    }

    fn release(&self) {
        if self.capacity.is_some() {
            let mut held = self.held.lock().expect("limiter lock poisoned");
            *held -= 1;
            self.freed.notify_one();
        }
    }
}

/// A held run slot; dropping it frees the slot for the next waiter.
#[must_use = "the slot frees as soon as the guard drops"]
pub struct SlotGuard<'a> {
    limiter: &'a TaskLimiter,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// An ordered list of runs sharing one worker slot. Later runs may consume
/// artifacts of earlier ones, so order is strict.
pub type RunSequence = Vec<Box<dyn Runnable>>;

/// How one sequence ended: how many of its runs completed, and the error
/// that stopped it early, if any.
#[derive(Debug)]
pub struct SequenceOutcome {
    pub index: usize,
    pub completed: usize,
    pub total: usize,
    pub error: Option<RunError>,
}

impl SequenceOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-sequence outcomes of one executed study.
#[derive(Debug)]
pub struct StudyReport {
    pub outcomes: Vec<SequenceOutcome>,
}

impl StudyReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(SequenceOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SequenceOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.succeeded())
    }
}

/// A set of run sequences executed together under one concurrency bound.
/// Created once, executed once.
pub struct Study {
    sequences: Vec<RunSequence>,
    limiter: Arc<TaskLimiter>,
    execution: ExecutionConfig,
}

impl Study {
    /// Validates platform consistency across every run and picks the
    /// limiter: bounded by `max_processes` locally, unbounded on scheduler
    /// platforms where the queue owns the machine.
    pub fn new(
        sequences: Vec<RunSequence>,
        max_processes: usize,
    ) -> Result<Self, ConfigurationError> {
        let platform = study_platform(&sequences)?;
        let limiter = if platform.uses_scheduler() {
            TaskLimiter::unbounded()
        } else {
            TaskLimiter::bounded(max_processes)?
        };
        Ok(Self {
            sequences,
            limiter: Arc::new(limiter),
            execution: ExecutionConfig::default(),
        })
    }

    pub fn execution_config(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Re-homes every run directory under `folder/<run_dir_name>`. The
    /// first run of each sequence keeps a full copy of its inputs; the
    /// rest switch to minimal-copy mode, sharing the first run's layout.
    pub fn regroup_under(mut self, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        for sequence in &mut self.sequences {
            for (index, run) in sequence.iter_mut().enumerate() {
                let name = run_dir_name(run.run_dir());
                run.rebase(folder.join(name));
                if index > 0 {
                    run.set_copy_mode(CopyMode::Minimal);
                }
            }
        }
        self
    }

    /// Starts one worker per sequence, waits for all of them, and reports
    /// per-sequence outcomes. An execution error stops only the sequence
    /// that hit it.
    pub fn run(self) -> StudyReport {
        let Study {
            sequences,
            limiter,
            execution,
        } = self;
        info!(
            sequences = sequences.len(),
            capacity = ?limiter.capacity(),
            "starting study"
        );
        let outcomes = thread::scope(|scope| {
            let handles: Vec<_> = sequences
                .into_iter()
                .enumerate()
                .map(|(index, sequence)| {
                    let limiter = Arc::clone(&limiter);
                    let execution = execution.clone();
                    scope.spawn(move || run_sequence(index, sequence, &limiter, &execution))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("sequence worker panicked"))
                .collect()
        });
        StudyReport { outcomes }
    }
}

fn run_sequence(
    index: usize,
    mut sequence: RunSequence,
    limiter: &TaskLimiter,
    execution: &ExecutionConfig,
) -> SequenceOutcome {
    let total = sequence.len();
    let mut completed = 0;
    for run in sequence.iter_mut() {
        let slot = limiter.acquire();
        let result = run
            .setup()
            .and_then(|()| run.execute(execution))
            .and_then(|()| run.finish());
        drop(slot);
        match result {
            Ok(()) => completed += 1,
            Err(run_error) => {
                error!(
                    sequence = index,
                    run_dir = %run.run_dir().display(),
                    "sequence stopped: {run_error}"
                );
                return SequenceOutcome {
                    index,
                    completed,
                    total,
                    error: Some(run_error),
                };
            }
        }
    }
    info!(sequence = index, runs = completed, "sequence finished");
    SequenceOutcome {
        index,
        completed,
        total,
        error: None,
    }
}

fn study_platform(sequences: &[RunSequence]) -> Result<Platform, ConfigurationError> {
    let mut platform = None;
    for run in sequences.iter().flatten() {
        match platform {
            None => platform = Some(run.platform()),
            Some(expected) if expected != run.platform() => {
                return Err(ConfigurationError::MixedPlatforms {
                    expected,
                    found: run.platform(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(platform.unwrap_or_default())
}

fn run_dir_name(run_dir: &Path) -> String {
    run_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string())
}
