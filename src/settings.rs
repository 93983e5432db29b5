use std::path::PathBuf;

use anyhow::Result;

use workflow::CliOverride;

use crate::args::{Args, Command};

const WORKDIR_NAME: &str = "tinker";
const TASKDIR_NAME: &str = "tasks";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot determine a default work root ($HOME is not set)")]
    NoHome,
    #[error("Cannot determine a default task root")]
    NoProgramDir,
}

/// Action that should be taken by this command line invocation.
#[derive(Debug)]
pub enum Action {
    /// Print discovered task names.
    List,
    /// Build the schedule for a target and run or print it.
    Run { target: String, show: bool },
    /// Drive a pty script.
    Script(PathBuf),
}

/// Settings are like Args, except all the logic has been applied,
/// so defaults from the environment are filled in.
#[derive(Debug)]
pub struct Settings {
    pub action: Action,
    pub taskdir: PathBuf,
    pub workdir: PathBuf,
    pub params: Vec<CliOverride>,
    pub maxjobs: usize,
    pub clean: Vec<String>,
    pub clean_all: bool,
    pub yes: bool,
    pub verbose: u8,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let mut settings = Self {
            action: Action::List,
            taskdir: default_taskdir()?,
            workdir: default_workdir()?,
            params: Vec::with_capacity(0),
            maxjobs: default_maxjobs(),
            clean: Vec::with_capacity(0),
            clean_all: false,
            yes: false,
            verbose: args.verbose,
        };

        match args.command {
            Command::List { taskdir } => {
                if let Some(dir) = taskdir {
                    settings.taskdir = PathBuf::from(dir);
                }
            }
            Command::Runtask {
                task,
                show,
                params,
                maxjobs,
                clean,
                clean_all,
                workdir,
                taskdir,
                yes,
            } => {
                if let Some(dir) = taskdir {
                    settings.taskdir = PathBuf::from(dir);
                }
                if let Some(dir) = workdir {
                    settings.workdir = PathBuf::from(dir);
                }
                if let Some(n) = maxjobs {
                    settings.maxjobs = n.max(1);
                }
                settings.params = params
                    .iter()
                    .map(|p| CliOverride::parse(p))
                    .collect::<Result<_, _>>()?;
                settings.clean = clean;
                settings.clean_all = clean_all;
                settings.yes = yes;
                settings.action = match task {
                    // with no task, behave as `list`.
                    None => Action::List,
                    Some(target) => Action::Run { target, show },
                };
            }
            Command::Runscript { script } => {
                settings.action = Action::Script(PathBuf::from(script));
            }
        }

        Ok(settings)
    }
}

fn default_workdir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or(Error::NoHome)?;
    Ok(PathBuf::from(home).join(WORKDIR_NAME))
}

fn default_taskdir() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|_| Error::NoProgramDir)?;
    let dir = exe.parent().ok_or(Error::NoProgramDir)?;
    Ok(dir.join(TASKDIR_NAME))
}

fn default_maxjobs() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

// only used for testing:
impl Default for Settings {
    fn default() -> Self {
        Self {
            action: Action::List,
            taskdir: PathBuf::from("x"),
            workdir: PathBuf::from("x"),
            params: Vec::with_capacity(0),
            maxjobs: 1,
            clean: Vec::with_capacity(0),
            clean_all: false,
            yes: true,
            verbose: 0,
        }
    }
}
