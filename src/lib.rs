/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Task execution
mod exec;
/// Filesystem operations
mod fs;
/// The persistent job database
mod jobdb;
/// Combined command-line and environment run settings
mod settings;
/// Text UI
mod ui;
/// Per-node working directories
mod workdir;

// exported for tests:
pub use app::{run_script, App};
pub use args::{Args, Command};
pub use settings::Settings;

use std::process::ExitCode;

/// Run the command-line app.
pub fn run() -> Result<ExitCode, anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()
}
