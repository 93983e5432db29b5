//! Spawning a child under a fresh pty, with the release handshake that
//! keeps the script from racing the child's terminal setup.
//!
//! The child sets up its session and controlling terminal, registers the
//! termios IPC handlers, announces readiness with a RELEASE message, and
//! then blocks until the driver releases it back, at which point it execs
//! the target. Any pre-exec failure travels to the driver as an ERROR
//! message.

use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::rc::Rc;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, setsid, ForkResult};

use crate::ipc::{self, IpcChannel, Tag};
use crate::process::{Error, PtyProcess};
use crate::term;

/// Spawn `argv` on a new pty and wait for its setup handshake.
pub fn spawn(argv: &[String]) -> Result<PtyProcess, Error> {
    assert!(!argv.is_empty());

    let cargv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).expect("argv strings contain no NUL"))
        .collect();

    let (parent_sock, child_sock) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
    )?;

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let slave_path = ptsname_r(&master)?;

    // SAFETY: the child calls only exec or _exit after minimal setup; it
    // never unwinds back into this function.
    match unsafe { fork() }? {
        ForkResult::Child => {
            drop(parent_sock);
            drop(master);
            child_main(child_sock, &slave_path, &cargv);
        }
        ForkResult::Parent { child } => {
            drop(child_sock);
            let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
            let mut ipc = IpcChannel::new(parent_sock);

            let error = Rc::new(Cell::new(false));
            let error_msg: Rc<RefCell<Option<String>>> = Rc::default();
            let flag = Rc::clone(&error);
            let slot = Rc::clone(&error_msg);
            ipc.register(
                Tag::Error,
                Some(Box::new(move |_chan, msg| {
                    let text = String::from_utf8_lossy(&msg.payload).into_owned();
                    log::error!("child error: {text}");
                    flag.set(true);
                    *slot.borrow_mut() = Some(text);
                    Ok(())
                })),
            );

            // Stall until the tty is configured; this is what makes writes
            // racing the child's echo settings impossible.
            let released = wait_release(&mut ipc);
            match released {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    // the child died or the channel broke before releasing
                    // us; reap it exactly once and report.
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    let msg = error_msg
                        .borrow()
                        .clone()
                        .unwrap_or_else(|| String::from("child exited before release"));
                    return Err(Error::ChildSetup(msg));
                }
            }

            Ok(PtyProcess::new(child, master, ipc, error, error_msg))
        }
    }
}

/// Wait for a RELEASE message. `Ok(false)` means EOF arrived first.
fn wait_release(ipc: &mut IpcChannel) -> Result<bool, ipc::Error> {
    loop {
        if ipc.wait()? {
            return Ok(false);
        }
        match ipc.recv()? {
            Some(msg) if msg.tag == Tag::Release => return Ok(true),
            Some(_) | None => {
                if !ipc.okay() {
                    return Ok(false);
                }
            }
        }
    }
}

/// Everything the child does between fork and exec. Never returns.
fn child_main(sock: OwnedFd, slave_path: &str, argv: &[CString]) -> ! {
    let mut ipc = IpcChannel::new(sock);

    if setsid().is_err() {
        child_error(ipc, "setsid failed");
    }

    let slave_cpath = CString::new(slave_path).expect("pts path contains no NUL");
    // SAFETY: straight syscall; the fd is checked below.
    let slave = unsafe { libc::open(slave_cpath.as_ptr(), libc::O_RDWR) };
    if slave < 0 {
        child_error(ipc, "could not open pty slave");
    }

    // SAFETY: making the slave our controlling terminal; we own the session.
    if unsafe { libc::ioctl(slave, libc::TIOCSCTTY as libc::c_ulong, 0) } < 0 {
        child_error(ipc, "could not acquire controlling terminal");
    }

    let slave_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(slave) };
    let snapshot = match tcgetattr(slave_fd) {
        Ok(t) => Rc::new(RefCell::new(t)),
        Err(_) => child_error(ipc, "tcgetattr failed"),
    };

    // SAFETY: plain dup2/close onto the standard descriptors.
    unsafe {
        if libc::dup2(slave, libc::STDIN_FILENO) < 0
            || libc::dup2(slave, libc::STDOUT_FILENO) < 0
            || libc::dup2(slave, libc::STDERR_FILENO) < 0
        {
            libc::_exit(1);
        }
        if slave > libc::STDERR_FILENO {
            libc::close(slave);
        }
    }

    // the embedding process may trap SIGINT; the child shouldn't.
    // SAFETY: restoring the default disposition.
    if unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) }.is_err() {
        child_error(ipc, "could not restore SIGINT");
    }

    let inquiry_snapshot = Rc::clone(&snapshot);
    ipc.register(
        Tag::TermiosInquiry,
        Some(Box::new(move |chan, _msg| {
            let bytes = term::termios_bytes(&inquiry_snapshot.borrow());
            chan.send(Tag::TermiosSet, &bytes)
        })),
    );

    let set_snapshot = Rc::clone(&snapshot);
    ipc.register(
        Tag::TermiosSet,
        Some(Box::new(move |chan, msg| {
            let updated: Termios = term::termios_from_bytes(&msg.payload)
                .ok_or(ipc::Error::Protocol("termios payload malformed"))?;
            // SAFETY: stdin is the pty slave, duplicated above.
            let stdin = unsafe { std::os::fd::BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
            tcsetattr(stdin, SetArg::TCSANOW, &updated)
                .map_err(|e| ipc::Error::Handler(format!("tcsetattr: {e}")))?;
            *set_snapshot.borrow_mut() = updated;
            chan.send_nodata(Tag::TermiosAck)
        })),
    );

    // announce readiness, then stall until the script releases us.
    if ipc.send_nodata(Tag::Release).is_err() {
        // SAFETY: fork'd child exiting without unwinding.
        unsafe { libc::_exit(1) };
    }
    match wait_release(&mut ipc) {
        Ok(true) => {}
        Ok(false) => unsafe { libc::_exit(1) },
        Err(e) => child_error(ipc, &format!("waiting for release: {e}")),
    }
    let _ = ipc.close();

    let _ = nix::unistd::execvp(&argv[0], argv);

    // SAFETY: exec failed; nothing left to do but leave.
    unsafe { libc::_exit(1) };
}

/// Report a pre-exec failure to the driver, best effort, and exit.
fn child_error(mut ipc: IpcChannel, msg: &str) -> ! {
    let _ = ipc.send(Tag::Error, msg.as_bytes());
    let _ = ipc.close();
    // SAFETY: fork'd child exiting without unwinding.
    unsafe { libc::_exit(1) };
}
