//! Subprocess plumbing for launching simulation executables.
//!
//! Commands are full shell lines assembled by the run layer; they execute
//! through `sh -c` with the run directory as working directory, stdout
//! redirected to the run's output file and stderr to a `_err` sibling.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::domain::ExecutionError;

/// Lines of stderr kept in a non-zero-exit diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// A launched simulation process with its redirect bookkeeping.
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Child,
    command: String,
    run_dir: PathBuf,
    stderr_path: PathBuf,
}

impl SpawnedProcess {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the process exits. A non-zero status carries the tail
    /// of the captured stderr file.
    pub fn wait(mut self) -> Result<(), ExecutionError> {
        let status = self
            .child
            .wait()
            .map_err(|source| ExecutionError::Spawn {
                command: self.command.clone(),
                run_dir: self.run_dir.clone(),
                source,
            })?;
        if status.success() {
            return Ok(());
        }
        Err(ExecutionError::NonZeroExit {
            command: self.command,
            status,
            run_dir: self.run_dir,
            stderr_tail: tail_lines(&self.stderr_path, STDERR_TAIL_LINES),
        })
    }
}

/// Spawns `command` through the shell in `run_dir`, redirecting stdout to
/// `output_file` and stderr to `<output_file>_err` inside the run
/// directory.
pub fn spawn_redirected(
    command: &str,
    run_dir: &Path,
    output_file: &str,
) -> Result<SpawnedProcess, ExecutionError> {
    let stdout_path = run_dir.join(output_file);
    let stderr_path = run_dir.join(format!("{output_file}_err"));
    let stdout = File::create(&stdout_path).map_err(|source| ExecutionError::OutputCapture {
        path: stdout_path.clone(),
        source,
    })?;
    let stderr = File::create(&stderr_path).map_err(|source| ExecutionError::OutputCapture {
        path: stderr_path.clone(),
        source,
    })?;

    debug!(command, run_dir = %run_dir.display(), "spawning");
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(run_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|source| ExecutionError::Spawn {
            command: command.to_string(),
            run_dir: run_dir.to_path_buf(),
            source,
        })?;

    Ok(SpawnedProcess {
        child,
        command: command.to_string(),
        run_dir: run_dir.to_path_buf(),
        stderr_path,
    })
}

/// Runs `command` through the shell and returns its trimmed stdout.
/// Used for queue submissions and state queries, where the output is the
/// interesting part and failures must carry the stderr text.
pub fn run_captured(command: &str, run_dir: &Path) -> Result<String, ExecutionError> {
    debug!(command, run_dir = %run_dir.display(), "running captured");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(run_dir)
        .output()
        .map_err(|source| ExecutionError::Spawn {
            command: command.to_string(),
            run_dir: run_dir.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(ExecutionError::Submission {
            command: command.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Last `count` lines of a text file, empty when the file is unreadable.
pub fn tail_lines(path: &Path, count: usize) -> String {
    let Ok(text) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_and_stderr_land_in_their_files() {
        let dir = tempfile::tempdir().unwrap();
        let spawned =
            spawn_redirected("echo forward; echo sideways >&2", dir.path(), "output").unwrap();
        spawned.wait().unwrap();

        let stdout = std::fs::read_to_string(dir.path().join("output")).unwrap();
        let stderr = std::fs::read_to_string(dir.path().join("output_err")).unwrap();
        assert_eq!(stdout.trim(), "forward");
        assert_eq!(stderr.trim(), "sideways");
    }

    #[test]
    fn non_zero_exit_carries_the_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let spawned =
            spawn_redirected("echo boom >&2; exit 3", dir.path(), "output").unwrap();
        let error = spawned.wait().unwrap_err();
        match error {
            ExecutionError::NonZeroExit { stderr_tail, .. } => {
                assert_eq!(stderr_tail.trim(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn captured_runs_return_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let stdout = run_captured("echo 1234.queue", dir.path()).unwrap();
        assert_eq!(stdout, "1234.queue");

        let error = run_captured("echo denied >&2; exit 1", dir.path()).unwrap_err();
        assert!(matches!(error, ExecutionError::Submission { detail, .. } if detail == "denied"));
    }

    #[test]
    fn tail_keeps_only_the_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(tail_lines(&path, 2), "three\nfour");
        assert_eq!(tail_lines(&dir.path().join("absent"), 2), "");
    }
}
