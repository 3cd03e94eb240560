//! Batch-queue submission for scheduler platforms.
//!
//! A [`PbsJob`] renders a submission script into the run directory, hands
//! it to `qsub`, and can poll `qstat` until the job leaves the queue.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::domain::ExecutionError;
use crate::process::run_captured;

/// Default interval between queue-state polls while blocking on a job.
pub const DEFAULT_POLL: Duration = Duration::from_secs(10);

const SCRIPT_NAME: &str = "submit.pbs";

/// One queue submission: the resources it asks for and the command line
/// the scheduler should run inside the run directory.
#[derive(Debug, Clone)]
pub struct PbsJob {
    run_dir: PathBuf,
    job_name: String,
    nprocs: usize,
    walltime: String,
    command: String,
    queue: Option<String>,
    extra_directives: Vec<String>,
    preamble: Vec<String>,
}

impl PbsJob {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        job_name: impl Into<String>,
        nprocs: usize,
        walltime: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            run_dir: run_dir.into(),
            job_name: job_name.into(),
            nprocs,
            walltime: walltime.into(),
            command: command.into(),
            queue: None,
            extra_directives: Vec::new(),
            preamble: Vec::new(),
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn extra_directive(mut self, directive: impl Into<String>) -> Self {
        self.extra_directives.push(directive.into());
        self
    }

    /// Environment lines (module loads, exports) run before changing into
    /// the submission directory.
    pub fn preamble_line(mut self, line: impl Into<String>) -> Self {
        self.preamble.push(line.into());
        self
    }

    /// The submission script: resource directives, then the command run
    /// from the directory the job was submitted from.
    pub fn script_text(&self) -> String {
        let mut script = String::new();
        script.push_str("#!/bin/sh\n");
        script.push_str(&format!("#PBS -N {}\n", self.job_name));
        script.push_str(&format!("#PBS -l select={}\n", self.nprocs));
        script.push_str(&format!("#PBS -l walltime={}\n", self.walltime));
        if let Some(queue) = &self.queue {
            script.push_str(&format!("#PBS -q {queue}\n"));
        }
        for directive in &self.extra_directives {
            script.push_str(&format!("#PBS {directive}\n"));
        }
        script.push('\n');
        for line in &self.preamble {
            script.push_str(line);
            script.push('\n');
        }
        script.push_str("cd $PBS_O_WORKDIR\n");
        script.push_str(&self.command);
        script.push('\n');
        script
    }

    /// Writes the submission script into the run directory.
    pub fn write_script(&self) -> std::io::Result<PathBuf> {
        let path = self.run_dir.join(SCRIPT_NAME);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(self.script_text().as_bytes())?;
        Ok(path)
    }

    /// Submits the written script with `qsub`. Returns the handle `qstat`
    /// knows the job by, or `None` on a dry run.
    pub fn submit(&self, script: &Path, dry_run: bool) -> Result<Option<QueueHandle>, ExecutionError> {
        let command = format!("qsub '{}'", script.display());
        if dry_run {
            info!(
                run_dir = %self.run_dir.display(),
                command,
                "dry run, not submitting"
            );
            return Ok(None);
        }
        let job_id = run_captured(&command, &self.run_dir)?;
        info!(job_id, run_dir = %self.run_dir.display(), "submitted");
        Ok(Some(QueueHandle {
            id: job_id,
            run_dir: self.run_dir.clone(),
        }))
    }
}

/// A submitted job as the scheduler names it.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    id: String,
    run_dir: PathBuf,
}

impl QueueHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Polls the queue until the job is no longer listed. `qstat` failing
    /// on the job id means it has left the queue.
    pub fn wait(&self, poll: Duration) -> Result<(), ExecutionError> {
        loop {
            match run_captured(&format!("qstat {}", self.id), &self.run_dir) {
                Ok(_) => {
                    debug!(job_id = self.id.as_str(), "still queued");
                    std::thread::sleep(poll);
                }
                Err(ExecutionError::Submission { .. }) => return Ok(()),
                Err(other) => return Err(other),
            }
        }
    }
}
