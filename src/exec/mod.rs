/// Runs the schedule
mod scheduler;
pub use scheduler::TaskSched;

/// Run a subprocess
mod run_cmd;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task '{0}' failed")]
    TaskFailed(String),
}
