use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use traverse::Schedule;
use workflow::TaskUniverse;

use crate::exec::TaskSched;
use crate::fs::Fs;
use crate::jobdb::JobDb;
use crate::settings::{Action, Settings};
use crate::ui::Ui;
use crate::workdir::Workdir;

/// This struct actually runs the command-line app.
pub struct App {
    settings: Settings,
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self { settings, ui }
    }

    /// Run the app, using settings to determine what to do.
    pub fn run(mut self) -> Result<ExitCode> {
        match &self.settings.action {
            Action::List => {
                let universe = self.load_universe()?;
                for name in universe.sorted_names() {
                    println!("{name}");
                }
                Ok(ExitCode::SUCCESS)
            }
            Action::Script(path) => {
                let code = pty::run_script_file(path)?;
                Ok(ExitCode::from(code.clamp(0, 255) as u8))
            }
            Action::Run { target, show } => {
                let target = target.clone();
                let show = *show;
                self.run_task(&target, show)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn load_universe(&self) -> Result<TaskUniverse> {
        self.ui.step("loading tasks", || {
            TaskUniverse::load(&self.settings.taskdir)
                .with_context(|| format!("while loading tasks from {:?}", self.settings.taskdir))
        })
    }

    fn run_task(&mut self, target: &str, show: bool) -> Result<()> {
        let universe = self.load_universe()?;

        let schedule = self.ui.step("building schedule", || {
            traverse::resolve(&universe, target, &self.settings.params)
        })?;

        if show {
            schedule.print();
            return Ok(());
        }

        let mut fs = Fs::new(&self.settings.workdir);
        fs.ensure_root_exists(self.ui.verbose)?;
        let workdir = Workdir::new(&fs);

        // clean-all runs before the job database is opened, since the
        // database file lives under the work root and goes with it.
        if self.settings.clean_all {
            workdir.clean_all(&self.ui)?;
        }
        workdir.init_root()?;
        if self.ui.verbose {
            let existing = workdir.enumerate()?;
            eprintln!("Work root holds {} cached node dirs.", existing.len());
        }

        let jobdb = JobDb::open(&fs.jobdb_path())?;
        self.clean_requested(&workdir, &schedule, &jobdb)?;

        let mut sched = TaskSched::new(
            &universe,
            &schedule,
            &fs,
            &jobdb,
            &mut self.ui,
            self.settings.maxjobs,
        );
        sched.run().context("while running schedule")?;
        Ok(())
    }

    fn clean_requested(
        &self,
        workdir: &Workdir<'_>,
        schedule: &Schedule,
        jobdb: &JobDb,
    ) -> Result<()> {
        if self.settings.clean.is_empty() {
            return Ok(());
        }
        eprintln!(
            "{} {} and all transitive consumers.",
            "Cleaning requested:".magenta(),
            self.settings.clean.join(", ")
        );
        if !self.ui.confirm("clean these nodes and their consumers")? {
            anyhow::bail!("clean aborted");
        }
        workdir.clean_aliases(schedule, &self.settings.clean, jobdb)
    }
}

/// Convenience for tests: run a script file the way the `runscript`
/// subcommand does.
pub fn run_script(path: &Path) -> Result<i32> {
    pty::run_script_file(path)
}
