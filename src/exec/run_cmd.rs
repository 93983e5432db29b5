use std::fs::File;
use std::io::{stderr, stdout, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::fs::Fs;

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";

/// Run a subprocess, teeing stdout and stderr both to the console and to
/// files in the given artifacts dir.
pub fn run_cmd(cmd: &mut Command, artifacts_dir: &Path, fs: &Fs, verbose: bool) -> Result<bool> {
    let (out_file, err_file) = make_log_files(fs, artifacts_dir)?;

    if verbose {
        eprintln!("{}", "Running command...".magenta());
    }
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|_| {
            panic!(
                "failed to execute child process {:?} {:?}",
                cmd.get_program(),
                cmd.get_args(),
            )
        });

    let child_out = child.stdout.take().expect("Cannot attach to child stdout");
    let child_err = child.stderr.take().expect("Cannot attach to child stderr");

    let thread_out = thread::spawn(move || {
        communicate(child_out, out_file, stdout()).expect("error communicating with child stdout")
    });
    let thread_err = thread::spawn(move || {
        communicate(child_err, err_file, stderr()).expect("error communicating with child stderr")
    });

    thread_out.join().expect("Error joining stdout thread");
    thread_err.join().expect("Error joining stderr thread");

    let status = child.wait().expect("failed to wait on child process");

    if verbose {
        eprintln!("{} with {status}.", "Process finished".green());
    }
    Ok(status.success())
}

fn communicate<R: Read, W: Write>(
    mut stream: R,
    mut file: File,
    mut output: W,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }

        let buf = &buf[..num_read];
        file.write_all(buf)?;
        output.write_all(buf)?;
    }

    Ok(())
}

fn make_log_files(fs: &Fs, artifacts_dir: &Path) -> Result<(File, File)> {
    let out_file = fs
        .create_file(artifacts_dir.join(STDOUT_FILE))
        .context("creating stdout.txt file")?;

    let err_file = fs
        .create_file(artifacts_dir.join(STDERR_FILE))
        .context("creating stderr.txt file")?;

    Ok((out_file, err_file))
}
