use std::io::IsTerminal;
use std::time::Instant;

use anyhow::Result;
use colored::Colorize;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -v setting, displays extra text info to user
    pub verbose: bool,
    /// true when stdout is not a terminal; handed to task actions
    pub quiet: bool,
    /// -y setting, turns every destructive-operation prompt into a yes
    assume_yes: bool,
    /// wall clock for the schedule entry currently executing
    task_started: Option<Instant>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            quiet: !std::io::stdout().is_terminal(),
            assume_yes: settings.yes,
            task_started: None,
        }
    }

    /// Ask before a destructive operation (cleaning node dirs, purging the
    /// work root). `operation` completes the sentence "About to ...".
    pub fn confirm(&self, operation: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        eprintln!("About to {operation}. Continue? [y/N]");
        let mut answer = String::with_capacity(8);
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }

    /// Run one phase of schedule construction, narrating it in verbose
    /// mode: "loading tasks... ok."
    pub fn step<T>(&self, what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.verbose {
            return f();
        }
        eprint!("{}... ", what.magenta());
        let result = f();
        match &result {
            Ok(_) => eprintln!("{}.", "ok".green()),
            Err(_) => eprintln!("{}.", "failed".red()),
        }
        result
    }

    /// Mark the start of a schedule entry's execution.
    pub fn task_begin(&mut self) {
        self.task_started = Some(Instant::now());
    }

    /// Report how long the entry's action ran, in verbose mode.
    pub fn task_done(&mut self, task: &str) {
        if let Some(started) = self.task_started.take() {
            if self.verbose {
                eprintln!("Task '{task}' finished in {:?}.", started.elapsed());
            }
        }
    }
}
