use clap::{ArgAction, Parser, Subcommand};

const CMD_NAME: &str = "tinker";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print every discovered task name, sorted, one per line
    List {
        /// Task discovery root
        #[arg(long, value_name = "DIR")]
        #[arg(env = "TINKER_TASKDIR")]
        taskdir: Option<String>,
    },

    /// Build and run (or print) the schedule for a task
    Runtask {
        /// Target task name; without one, behaves like `list`
        task: Option<String>,

        /// Print the schedule without running anything
        #[arg(short, long)]
        show: bool,

        /// Override a parameter: [alias:...:]name=value
        #[arg(short, long = "param", value_name = "KEY=VAL")]
        params: Vec<String>,

        /// Parallelism hint passed to task actions
        #[arg(short = 'j', long, value_name = "N")]
        maxjobs: Option<usize>,

        /// Clean the workdir of this node and its consumers before running
        #[arg(short, long = "clean", value_name = "ALIAS")]
        clean: Vec<String>,

        /// Clean the entire work root before running
        #[arg(short = 'C', long)]
        clean_all: bool,

        /// Work root directory
        #[arg(long, value_name = "DIR")]
        #[arg(env = "TINKER_WORKDIR")]
        workdir: Option<String>,

        /// Task discovery root
        #[arg(long, value_name = "DIR")]
        #[arg(env = "TINKER_TASKDIR")]
        taskdir: Option<String>,

        /// Bypass user confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Drive a match script against a child process on a pty
    Runscript {
        /// Path of the script file
        script: String,
    },
}
