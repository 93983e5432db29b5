/// The framed message channel between driver and child
mod ipc;
pub use ipc::{IpcChannel, IpcMsg, Tag};

/// Spawning the child under its pty with the release handshake
mod spawn;
pub use spawn::spawn;

/// The parent-side process handle
mod process;
pub use process::{PtyProcess, ReadOutcome};

/// Terminal attribute exchange and the stty flag table
mod term;
pub use term::{termios_bytes, termios_from_bytes, TtyFlag};

/// Compiled scripts: MatchActions and MatchContexts
mod action;
pub use action::{ActionKind, Compiler, MatchAction, MatchContext, Matcher};

/// The drive stage
mod driver;
pub use driver::{hexdump, run_script_file, Driver, ScriptError};
