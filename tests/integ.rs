use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use tempfile::tempdir;
use tinker::{App, Args, Command, Settings};

const TASKDIR: &str = "demos/tasks";

fn runtask_args(workdir: &str, task: &str, params: Vec<String>) -> Args {
    Args {
        verbose: 1,
        command: Command::Runtask {
            task: Some(task.to_owned()),
            show: false,
            params,
            maxjobs: Some(2),
            clean: Vec::with_capacity(0),
            clean_all: false,
            workdir: Some(workdir.to_owned()),
            taskdir: Some(TASKDIR.to_owned()),
            yes: true,
        },
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let settings: Settings = args.try_into()?;
    App::new(settings).run()
}

fn stringify_dir(dir: &tempfile::TempDir) -> String {
    dir.path().to_str().unwrap().to_owned()
}

/// The single fingerprint directory of a task that ran once.
fn entry_dir(workdir: &Path, task: &str) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(workdir.join(task))
        .expect("task dir exists")
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(1, dirs.len(), "expected exactly one fingerprint dir");
    dirs.pop().unwrap()
}

fn stdout_of(workdir: &Path, task: &str) -> String {
    std::fs::read_to_string(entry_dir(workdir, task).join("stdout.txt")).unwrap()
}

fn mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

#[test]
fn test_param_default() -> Result<()> {
    let output = tempdir()?;
    run(runtask_args(&stringify_dir(&output), "example/hello-world", vec![]))?;
    assert_eq!("Hello, world!\n", stdout_of(output.path(), "example/hello-world"));
    Ok(())
}

#[test]
fn test_param_override() -> Result<()> {
    let output = tempdir()?;
    run(runtask_args(
        &stringify_dir(&output),
        "example/hello-world",
        vec![String::from("addressee=markj")],
    ))?;
    assert_eq!("Hello, markj!\n", stdout_of(output.path(), "example/hello-world"));
    Ok(())
}

#[test]
fn test_unknown_param_is_fatal() {
    let output = tempdir().unwrap();
    let err = run(runtask_args(
        &stringify_dir(&output),
        "example/hello-world",
        vec![String::from("addresseee=markj")],
    ))
    .unwrap_err();
    assert!(
        format!("{err:#}").contains("Binding non-existent parameter 'addresseee'"),
        "got: {err:#}"
    );
    // nothing ran:
    assert!(!output.path().join("example").exists());
}

#[test]
fn test_aliased_override() -> Result<()> {
    let output = tempdir()?;
    run(runtask_args(
        &stringify_dir(&output),
        "example/hello-input",
        vec![String::from("hello:addressee=jkram")],
    ))?;
    assert_eq!("Hello, jkram!\n", stdout_of(output.path(), "example/hello-world"));
    assert_eq!("Goodbye!\n", stdout_of(output.path(), "example/hello-input"));
    Ok(())
}

#[test]
fn test_validation_list() {
    let output = tempdir().unwrap();
    let err = run(runtask_args(
        &stringify_dir(&output),
        "example/hello-valid",
        vec![
            String::from("msg1=This is the only valid message."),
            String::from("msg2=plibt"),
        ],
    ))
    .unwrap_err();
    assert!(
        format!("{err:#}").contains("Validation of parameter 'msg2' value 'plibt' failed"),
        "got: {err:#}"
    );
}

#[test]
fn test_missing_required_is_fatal() {
    let output = tempdir().unwrap();
    let err = run(runtask_args(
        &stringify_dir(&output),
        "example/hello-valid",
        vec![],
    ))
    .unwrap_err();
    assert!(format!("{err:#}").contains("missing required parameter 'msg1'"));
}

#[test]
fn test_second_run_is_all_cache_hits() -> Result<()> {
    let output = tempdir()?;
    let workdir = stringify_dir(&output);

    run(runtask_args(&workdir, "build/release", vec![]))?;
    let checkout_stdout = entry_dir(output.path(), "build/checkout").join("stdout.txt");
    let release_stdout = entry_dir(output.path(), "build/release").join("stdout.txt");
    let checkout_before = mtime(&checkout_stdout);
    let release_before = mtime(&release_stdout);

    // coarse filesystem timestamps need a beat between runs.
    std::thread::sleep(Duration::from_millis(1100));
    run(runtask_args(&workdir, "build/release", vec![]))?;

    assert_eq!(checkout_before, mtime(&checkout_stdout), "checkout was not re-run");
    assert_eq!(release_before, mtime(&release_stdout), "release was not re-run");
    Ok(())
}

#[test]
fn test_outputs_flow_to_consumers() -> Result<()> {
    let output = tempdir()?;
    run(runtask_args(&stringify_dir(&output), "build/release", vec![]))?;

    let packaged = entry_dir(output.path(), "build/release").join("pkg/REVISION");
    assert_eq!("main\n", std::fs::read_to_string(packaged)?);
    assert_eq!("packaged main\n", stdout_of(output.path(), "build/release"));
    Ok(())
}

#[test]
fn test_clean_invalidates_consumers_only() -> Result<()> {
    let output = tempdir()?;
    let workdir = stringify_dir(&output);
    run(runtask_args(&workdir, "build/release", vec![]))?;

    let checkout_stdout = entry_dir(output.path(), "build/checkout").join("stdout.txt");
    let release_stdout = entry_dir(output.path(), "build/release").join("stdout.txt");
    let checkout_before = mtime(&checkout_stdout);
    let release_before = mtime(&release_stdout);

    std::thread::sleep(Duration::from_millis(1100));

    // clean the target itself: its input must stay cached.
    let mut args = runtask_args(&workdir, "build/release", vec![]);
    if let Command::Runtask { clean, .. } = &mut args.command {
        clean.push(String::new());
    }
    run(args)?;

    assert_eq!(checkout_before, mtime(&checkout_stdout), "input stayed cached");
    assert!(release_before < mtime(&release_stdout), "target was re-run");

    // clean the input alias: the input and its consumer both re-run.
    let release_before = mtime(&release_stdout);
    std::thread::sleep(Duration::from_millis(1100));
    let mut args = runtask_args(&workdir, "build/release", vec![]);
    if let Command::Runtask { clean, .. } = &mut args.command {
        clean.push(String::from("co"));
    }
    run(args)?;

    assert!(checkout_before < mtime(&checkout_stdout), "input was re-run");
    assert!(release_before < mtime(&release_stdout), "consumer was re-run");
    Ok(())
}

#[test]
fn test_distinct_bindings_get_distinct_workdirs() -> Result<()> {
    let output = tempdir()?;
    let workdir = stringify_dir(&output);

    run(runtask_args(&workdir, "example/hello-world", vec![]))?;
    run(runtask_args(
        &workdir,
        "example/hello-world",
        vec![String::from("addressee=other")],
    ))?;

    let dirs = std::fs::read_dir(output.path().join("example/hello-world"))?
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert_eq!(2, dirs);
    Ok(())
}

#[test]
fn test_show_mode_runs_nothing() -> Result<()> {
    let output = tempdir()?;
    let mut args = runtask_args(&stringify_dir(&output), "build/release", vec![]);
    if let Command::Runtask { show, .. } = &mut args.command {
        *show = true;
    }
    run(args)?;
    assert!(!output.path().join("build").exists());
    assert!(!output.path().join("jobs.db").exists());
    Ok(())
}

#[test]
fn test_unknown_task() {
    let output = tempdir().unwrap();
    let err = run(runtask_args(&stringify_dir(&output), "no/such/task", vec![])).unwrap_err();
    assert!(format!("{err:#}").contains("Unknown task 'no/such/task'"));
}

#[test]
fn test_list_subcommand() -> Result<()> {
    run(Args {
        verbose: 0,
        command: Command::List {
            taskdir: Some(TASKDIR.to_owned()),
        },
    })?;
    Ok(())
}

#[test]
fn test_script_cat_roundtrip() -> Result<()> {
    let code = tinker::run_script(Path::new("demos/scripts/cat-hello.script"))?;
    assert_eq!(0, code);
    Ok(())
}

#[test]
fn test_script_timeout_is_bounded() {
    let start = Instant::now();
    let err = tinker::run_script(Path::new("demos/scripts/timeout.script")).unwrap_err();
    let elapsed = start.elapsed();
    assert!(format!("{err:#}").contains("timeout waiting for match 'XXX'"));
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(5), "failed in {elapsed:?}");
}
