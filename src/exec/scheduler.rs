use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use colored::Colorize;

use traverse::{Schedule, ScheduleEntry};
use workflow::TaskUniverse;

use crate::fs::Fs;
use crate::jobdb::{JobDb, JobRecord};
use crate::ui::Ui;
use crate::workdir::Workdir;

use super::{run_cmd::run_cmd, Error};

/// The sequential executor.
///
/// Walks the schedule in order. For each entry it checks the job database;
/// on a hit with an intact workdir the action is skipped and downstream
/// consumers see the cached outputs (they live at fingerprint-derived
/// paths, so nothing needs copying). On a miss the workdir is prepared and
/// the task's code runs under bash with its binding, its inputs' output
/// paths, and its own output paths in the environment. The first failure
/// stops the schedule; only successful entries are recorded.
pub struct TaskSched<'a> {
    universe: &'a TaskUniverse,
    schedule: &'a Schedule,
    fs: &'a Fs,
    jobdb: &'a JobDb,
    ui: &'a mut Ui,
    maxjobs: usize,
}

impl<'a> TaskSched<'a> {
    pub fn new(
        universe: &'a TaskUniverse,
        schedule: &'a Schedule,
        fs: &'a Fs,
        jobdb: &'a JobDb,
        ui: &'a mut Ui,
        maxjobs: usize,
    ) -> Self {
        Self {
            universe,
            schedule,
            fs,
            jobdb,
            ui,
            maxjobs,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let workdir = Workdir::new(self.fs);

        for entry in &self.schedule.entries {
            let cached = self.jobdb.lookup(&entry.fingerprint)?.is_some() && workdir.intact(entry);
            if cached {
                eprintln!(
                    "{} {} [{}]",
                    "CACHED".green(),
                    entry.task.cyan(),
                    entry.fingerprint.short()
                );
                continue;
            }

            self.ui.task_begin();
            let dir = workdir
                .prepare(entry)
                .with_context(|| format!("while preparing workdir for task '{}'", entry.task))?;
            eprintln!(
                "{} {} [{}]\nin {dir:?}",
                "RUN".green(),
                entry.task.cyan(),
                entry.fingerprint.short()
            );

            let mut cmd = self.build_cmd(entry, &dir);
            let success = run_cmd(&mut cmd, &dir, self.fs, self.ui.verbose)?;
            if !success {
                return Err(Error::TaskFailed(entry.task.clone()).into());
            }

            self.ui.task_done(&entry.task);
            self.jobdb
                .insert(&JobRecord::completed(
                    &entry.fingerprint,
                    &entry.task,
                    dir.to_str().unwrap_or_default(),
                ))
                .with_context(|| format!("while recording task '{}'", entry.task))?;
            eprintln!("{} {}", "COMPLETED".green(), entry.task.cyan());
        }

        eprintln!("{}", "Completed schedule.".green());
        Ok(())
    }

    /// Assemble the bash invocation for one entry: params, input output
    /// paths, and own output paths all travel as environment variables.
    fn build_cmd(&self, entry: &ScheduleEntry, dir: &Path) -> Command {
        let task = self
            .universe
            .get(&entry.task)
            .expect("scheduled tasks exist in the universe");

        let mut cmd = Command::new("/usr/bin/env");
        cmd.arg("bash").arg("-euo").arg("pipefail");
        cmd.current_dir(dir);

        for (name, value) in entry.binding.iter() {
            cmd.env(env_name(name), value.string_form());
        }

        for (alias, input_idx) in &entry.inputs {
            let input = &self.schedule.entries[*input_idx];
            let input_dir = self.fs.entry_dir(&input.task, &input.fingerprint);
            for output in &input.outputs {
                cmd.env(
                    format!("{}_{}", env_name(alias), env_name(output)),
                    input_dir.join(output),
                );
            }
        }

        for output in &entry.outputs {
            cmd.env(env_name(output), dir.join(output));
        }

        cmd.env("TINKER_MAXJOBS", self.maxjobs.to_string());
        cmd.env("TINKER_TMPDIR", self.fs.tmp_dir());
        cmd.env("TINKER_QUIET", if self.ui.quiet { "1" } else { "0" });

        cmd.arg("-c").arg(&task.code);
        cmd
    }
}

/// Task and variable names may contain dashes; environment names can't.
fn env_name(name: &str) -> String {
    name.replace('-', "_")
}
