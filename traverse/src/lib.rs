/// Schedule entries and their node identities
mod node;
pub use node::{NodeKey, ScheduleEntry};

/// Depth-first resolution of the dependency graph
mod resolver;
pub use resolver::resolve;

/// The ordered execution schedule
mod schedule;
pub use schedule::Schedule;
