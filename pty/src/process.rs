//! Parent-side handle for a child running under a controlled pty.

use std::cell::{Cell, RefCell};
use std::os::fd::{AsFd, OwnedFd};
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::sys::signal::{kill, SigAction, SigHandler, SaFlags, SigSet, Signal};
use nix::sys::termios::Termios;
use nix::sys::time::{TimeVal, TimeValLike};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::ipc::{self, IpcChannel, IpcMsg, Tag};
use crate::term;

/// Grace period between SIGINT and SIGKILL when closing.
const CLOSE_GRACE_SECS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("process already released")]
    AlreadyReleased,
    #[error("no live child process")]
    NotRunning,
    #[error("child process setup failed: {0}")]
    ChildSetup(String),
    #[error("could not kill process with SIGINT")]
    UnkillableChild,
    #[error("spawned process killed with signal {0}")]
    KilledBySignal(i32),
    #[error("unexpected ipc message {0:?} during termios exchange")]
    UnexpectedMessage(Tag),
    #[error("termios payload malformed")]
    BadTermios,
    #[error(transparent)]
    Ipc(#[from] ipc::Error),
    #[error("pty i/o error: {0}")]
    Os(#[from] Errno),
}

/// Outcome of waiting for the pty master to become readable.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Ready,
    TimedOut,
}

/// A child spawned on a fresh pty, plus the state the driver needs to
/// track about it. Invariants: the master fd lives until EOF or close;
/// `released` transitions once; `error` is sticky; `waitpid` happens
/// exactly once per child, at EOF discovery or at close.
pub struct PtyProcess {
    pub(crate) pid: Option<Pid>,
    pub(crate) master: Option<OwnedFd>,
    pub(crate) ipc: Option<IpcChannel>,
    pub released: bool,
    pub eof: bool,
    pub(crate) error: Rc<Cell<bool>>,
    pub(crate) error_msg: Rc<RefCell<Option<String>>>,
    status: Option<WaitStatus>,
}

impl PtyProcess {
    pub(crate) fn new(
        pid: Pid,
        master: OwnedFd,
        ipc: IpcChannel,
        error: Rc<Cell<bool>>,
        error_msg: Rc<RefCell<Option<String>>>,
    ) -> Self {
        Self {
            pid: Some(pid),
            master: Some(master),
            ipc: Some(ipc),
            released: false,
            eof: false,
            error,
            error_msg,
            status: None,
        }
    }

    /// Sticky error flag, set by the child's ERROR messages.
    pub fn errored(&self) -> bool {
        self.error.get()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_msg.borrow().clone()
    }

    /// Send the release token and shut the IPC channel down. After this
    /// the child is executing the target program and the only remaining
    /// link is the pty.
    pub fn release(&mut self) -> Result<(), Error> {
        let mut ipc = self.ipc.take().ok_or(Error::AlreadyReleased)?;
        let res = ipc.send_nodata(Tag::Release);
        let close_res = ipc.close();
        res?;
        close_res?;
        self.released = true;
        Ok(())
    }

    /// Wait up to `timeout` for child output. `None` blocks indefinitely.
    pub fn read_ready(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome, Error> {
        let Some(master) = self.master.as_ref() else {
            return Ok(ReadOutcome::Ready); // EOF is discovered by the read
        };
        let mut tv = timeout.map(|t| TimeVal::microseconds(t.as_micros() as i64));
        loop {
            let mut rfds = FdSet::new();
            rfds.insert(master.as_fd());
            match select(None, Some(&mut rfds), None, None, tv.as_mut()) {
                Ok(0) => return Ok(ReadOutcome::TimedOut),
                Ok(_) => return Ok(ReadOutcome::Ready),
                // timeout bookkeeping on EINTR is inherited from select(2)
                // updating the timeval in place on Linux.
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one chunk of child output. Zero bytes or EIO mean the slave
    /// side is gone: the master closes, `eof` latches, and the child is
    /// reaped if it has exited.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let Some(master) = self.master.as_ref() else {
            return Ok(0);
        };
        let n = loop {
            match nix::unistd::read(master.as_fd(), buf) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EIO) => break 0,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.eof = true;
            self.master = None;
            if let Some(signo) = self.reap_nohang()? {
                return Err(Error::KilledBySignal(signo));
            }
        }
        Ok(n)
    }

    /// Write all of `bytes` to the pty master.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let master = self.master.as_ref().ok_or(Error::NotRunning)?;
        let mut off = 0;
        while off < bytes.len() {
            match nix::unistd::write(master.as_fd(), &bytes[off..]) {
                Ok(n) => off += n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Fetch the child's current terminal attributes over IPC
    /// (inquiry -> set exchange). Only possible before release.
    pub fn term_snapshot(&mut self) -> Result<Termios, Error> {
        let ipc = self.ipc.as_mut().ok_or(Error::AlreadyReleased)?;

        let received: Rc<RefCell<Option<Termios>>> = Rc::default();
        let slot = Rc::clone(&received);
        ipc.register(
            Tag::TermiosSet,
            Some(Box::new(move |_chan, msg: IpcMsg| {
                let t = term::termios_from_bytes(&msg.payload)
                    .ok_or(ipc::Error::Protocol("termios payload malformed"))?;
                *slot.borrow_mut() = Some(t);
                Ok(())
            })),
        );

        let exchange = (|| -> Result<(), Error> {
            let ipc = self.ipc.as_mut().expect("checked above");
            ipc.send_nodata(Tag::TermiosInquiry)?;
            while received.borrow().is_none() {
                if ipc.wait()? {
                    return Err(Error::ChildSetup(String::from(
                        "child went away during termios inquiry",
                    )));
                }
                if let Some(msg) = ipc.recv()? {
                    return Err(Error::UnexpectedMessage(msg.tag));
                }
            }
            Ok(())
        })();

        if let Some(ipc) = self.ipc.as_mut() {
            ipc.register(Tag::TermiosSet, None);
        }
        exchange?;
        let t = received.borrow_mut().take().expect("exchange completed");
        Ok(t)
    }

    /// Push updated terminal attributes to the child and wait for its ack.
    pub fn term_set(&mut self, t: &Termios) -> Result<(), Error> {
        let ipc = self.ipc.as_mut().ok_or(Error::AlreadyReleased)?;
        ipc.send(Tag::TermiosSet, &term::termios_bytes(t))?;
        loop {
            if ipc.wait()? {
                return Err(Error::ChildSetup(String::from(
                    "child went away during termios update",
                )));
            }
            match ipc.recv()? {
                Some(msg) if msg.tag == Tag::TermiosAck => return Ok(()),
                Some(msg) => return Err(Error::UnexpectedMessage(msg.tag)),
                None => continue,
            }
        }
    }

    /// Terminate the child: SIGINT, a bounded wait, then SIGKILL. The
    /// SIGALRM handler is installed only for the wait window and restored
    /// afterwards.
    pub fn close(&mut self) -> Result<(), Error> {
        let mut failed = false;
        if let Some(pid) = self.pid {
            if let Some(signo) = self.reap_nohang()? {
                self.drop_fds();
                return Err(Error::KilledBySignal(signo));
            }
            if self.pid.is_some() {
                install_alarm_handler()?;
                let mut sig = Signal::SIGINT;
                loop {
                    nix::unistd::alarm::set(CLOSE_GRACE_SECS);
                    let _ = kill(pid, sig);
                    let res = waitpid(pid, None);
                    nix::unistd::alarm::cancel();
                    match res {
                        Ok(status) => {
                            self.status = Some(status);
                            self.pid = None;
                            break;
                        }
                        Err(_) => {
                            // if asking nicely didn't work, just kill it.
                            if sig != Signal::SIGKILL {
                                sig = Signal::SIGKILL;
                                continue;
                            }
                            failed = true;
                            break;
                        }
                    }
                }
                restore_alarm_handler()?;
            }
        }

        self.drop_fds();
        if failed {
            return Err(Error::UnkillableChild);
        }
        Ok(())
    }

    fn drop_fds(&mut self) {
        if let Some(ipc) = self.ipc.take() {
            let _ = ipc.close();
        }
        self.master = None;
    }

    /// Non-blocking reap. Returns the terminating signal, if any.
    fn reap_nohang(&mut self) -> Result<Option<i32>, Error> {
        let Some(pid) = self.pid else {
            return Ok(None);
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.status = Some(status);
                self.pid = None;
                if let WaitStatus::Signaled(_, sig, _) = status {
                    return Ok(Some(sig as i32));
                }
                Ok(None)
            }
            Err(Errno::ECHILD) => {
                self.pid = None;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exit_status(&self) -> Option<WaitStatus> {
        self.status
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        // last resort; a clean shutdown goes through close().
        if let Some(pid) = self.pid.take() {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
        }
    }
}

extern "C" fn alarm_noop(_signo: libc::c_int) {
    // exists so SIGALRM interrupts waitpid instead of killing us.
}

fn install_alarm_handler() -> Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(alarm_noop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler does nothing and is async-signal-safe.
    unsafe { nix::sys::signal::sigaction(Signal::SIGALRM, &action) }?;
    Ok(())
}

fn restore_alarm_handler() -> Result<(), Errno> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: restoring the default disposition.
    unsafe { nix::sys::signal::sigaction(Signal::SIGALRM, &action) }?;
    Ok(())
}
