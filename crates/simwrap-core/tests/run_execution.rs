//! End-to-end run lifecycles against real subprocesses: a full
//! setup-execute-finish pass, output redirection, failure reporting, and
//! dry runs.

use simwrap_core::runs::{CfdRun, MinimalRun};
use simwrap_core::{
    ExecutionConfig, ExecutionError, FinishAction, KeyValues, RunError, RunSpec, RunState,
    Runnable, Value,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const CFD_INPUT: &str = "0.005               !Time step delta t\n\
                         1.6                 !Viscosity\n\
                         2                   npx\n\
                         2                   npy\n\
                         1                   npz\n";

fn write_script(base: &Path, name: &str, body: &str) {
    let path = base.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn a_solver_run_goes_from_setup_to_finished_output() {
    let base = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_script(
        base.path(),
        "solver.sh",
        "#!/bin/sh\necho \"args: $@\"\necho \"Time taken = 0.01 s\"\n",
    );
    fs::write(base.path().join("couette.in"), CFD_INPUT).unwrap();

    let run_dir = scratch.path().join("visc0p9");
    let spec = RunSpec::new(base.path(), &run_dir, "./solver.sh", "couette.in")
        .change("!Viscosity", KeyValues::scalar(Value::Float(0.9)))
        .launch_prefix("");
    let mut run = CfdRun::new(spec).unwrap();

    run.setup().unwrap();
    assert_eq!(run.state(), RunState::SetUp);
    assert_eq!(run.process_count().unwrap(), 4);

    run.execute(&ExecutionConfig::default()).unwrap();
    run.finish().unwrap();

    assert_eq!(run.state(), RunState::Finished);
    let stdout = fs::read_to_string(run_dir.join("run.out")).unwrap();
    assert!(stdout.starts_with("args: couette.in\n"), "{stdout}");
    let patched = fs::read_to_string(run_dir.join("couette.in")).unwrap();
    assert!(patched.contains("0.9"));
    assert!(!patched.contains("1.6"));
}

#[test]
fn a_failing_executable_surfaces_its_stderr_and_fails_the_run() {
    let base = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_script(
        base.path(),
        "explode.sh",
        "#!/bin/sh\necho 'allocation failure' >&2\nexit 7\n",
    );
    fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

    let run_dir = scratch.path().join("r");
    let spec = RunSpec::new(base.path(), &run_dir, "./explode.sh", "input.in").launch_prefix("");
    let mut run = MinimalRun::new(spec).unwrap();

    run.setup().unwrap();
    let error = run.execute(&ExecutionConfig::default()).unwrap_err();

    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(error.exit_code(), 4);
    match error {
        RunError::Execution(ExecutionError::NonZeroExit { stderr_tail, .. }) => {
            assert_eq!(stderr_tail.trim(), "allocation failure");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        fs::read_to_string(run_dir.join("run.out_err")).unwrap().trim(),
        "allocation failure"
    );
}

#[test]
fn a_dry_run_spawns_nothing_but_walks_the_whole_lifecycle() {
    let base = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_script(base.path(), "solver.sh", "#!/bin/sh\necho ran\n");
    fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

    let run_dir = scratch.path().join("r");
    let spec = RunSpec::new(base.path(), &run_dir, "./solver.sh", "input.in")
        .launch_prefix("")
        .dry_run(true);
    let mut run = MinimalRun::new(spec).unwrap();

    run.setup().unwrap();
    run.execute(&ExecutionConfig::default()).unwrap();
    run.finish().unwrap();

    assert_eq!(run.state(), RunState::Finished);
    // The inputs were staged but the command never ran.
    assert!(run_dir.join("input.in").exists());
    assert!(!run_dir.join("run.out").exists());
}

#[test]
fn finish_actions_relocate_results_the_run_produced() {
    let base = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_script(
        base.path(),
        "solver.sh",
        "#!/bin/sh\nmkdir -p results\necho 'state bytes' > results/final_state\n",
    );
    fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

    let destination = scratch.path().join("kept.end");
    let spec = RunSpec::new(
        base.path(),
        scratch.path().join("r"),
        "./solver.sh",
        "input.in",
    )
    .launch_prefix("")
    .finish_action(FinishAction::MoveFinalState {
        destination: destination.clone(),
    });
    let mut run = MinimalRun::new(spec).unwrap();

    run.setup().unwrap();
    run.execute(&ExecutionConfig::default()).unwrap();
    run.finish().unwrap();

    assert_eq!(fs::read_to_string(&destination).unwrap().trim(), "state bytes");
}

#[test]
fn a_custom_output_file_collects_stdout_under_its_own_name() {
    let base = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    write_script(base.path(), "solver.sh", "#!/bin/sh\necho captured\n");
    fs::write(base.path().join("input.in"), "NSTEPS\n100\n").unwrap();

    let run_dir = scratch.path().join("r");
    let spec = RunSpec::new(base.path(), &run_dir, "./solver.sh", "input.in")
        .launch_prefix("")
        .output_file("solver.log");
    let mut run = MinimalRun::new(spec).unwrap();

    run.setup().unwrap();
    run.execute(&ExecutionConfig::default()).unwrap();
    run.finish().unwrap();

    assert_eq!(
        fs::read_to_string(run_dir.join("solver.log")).unwrap().trim(),
        "captured"
    );
    assert!(!run_dir.join("run.out").exists());
}
