//! Length-tagged message channel between the driver and the child,
//! carried over a non-blocking unix socketpair. Messages are framed as
//! `{size: u32, tag: u32}` in native byte order followed by
//! `size - 8` payload bytes; `size` counts the header. Tag zero is
//! reserved and never appears on the wire.

use std::collections::VecDeque;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::select::{select, FdSet};

pub const HEADER_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ipc channel is closed")]
    Closed,
    #[error("ipc protocol error: {0}")]
    Protocol(&'static str),
    #[error("ipc handler failed: {0}")]
    Handler(String),
    #[error("ipc i/o error: {0}")]
    Os(#[from] Errno),
}

/// Message tags. The numbering is part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Bidirectional setup synchronization.
    Release = 1,
    /// Child reports a pre-exec failure; payload is a UTF-8 string.
    Error = 2,
    /// Parent asks the child for its terminal attributes.
    TermiosInquiry = 3,
    /// Either side carries a native-layout termios structure.
    TermiosSet = 4,
    /// Child acknowledges an applied TermiosSet.
    TermiosAck = 5,
}

impl Tag {
    pub const COUNT: usize = 5;

    fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Release),
            2 => Some(Self::Error),
            3 => Some(Self::TermiosInquiry),
            4 => Some(Self::TermiosSet),
            5 => Some(Self::TermiosAck),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize - 1
    }
}

/// One received message.
#[derive(Debug)]
pub struct IpcMsg {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// Callback invoked for queued messages of a registered tag. Handlers may
/// send on the channel they are handed.
pub type Handler = Box<dyn FnMut(&mut IpcChannel, IpcMsg) -> Result<(), Error>>;

/// One endpoint of the duplex channel.
///
/// Incoming data is drained eagerly: before every send, and whenever the
/// socket polls readable. Messages with a registered handler are consumed
/// by it during [`IpcChannel::recv`]/pop; the rest queue up in arrival
/// order. Hitting EOF closes the socket but leaves queued messages
/// recoverable until drained.
pub struct IpcChannel {
    fd: Option<OwnedFd>,
    queue: VecDeque<IpcMsg>,
    handlers: [Option<Handler>; Tag::COUNT],
}

impl IpcChannel {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            fd: Some(fd),
            queue: VecDeque::new(),
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// True until EOF has been seen or the channel closed.
    pub fn okay(&self) -> bool {
        self.fd.is_some()
    }

    /// Install (or clear) the handler for one tag.
    pub fn register(&mut self, tag: Tag, handler: Option<Handler>) {
        self.handlers[tag.index()] = handler;
    }

    /// Send one message, draining incoming data first.
    pub fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<(), Error> {
        self.drain()?;
        let fd = self.fd.as_ref().ok_or(Error::Closed)?;

        let size = (HEADER_SIZE + payload.len()) as u32;
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&size.to_ne_bytes());
        frame.extend_from_slice(&(tag as u32).to_ne_bytes());
        frame.extend_from_slice(payload);

        full_write(fd, &frame)
    }

    pub fn send_nodata(&mut self, tag: Tag) -> Result<(), Error> {
        self.send(tag, &[])
    }

    /// Drain, then dequeue the head message (handlers run here).
    /// `Ok(None)` means nothing unhandled is pending.
    pub fn recv(&mut self) -> Result<Option<IpcMsg>, Error> {
        self.drain()?;
        self.pop(true)
    }

    /// Block until a message is queued or the socket is readable.
    /// Returns true if EOF has already been reached.
    pub fn wait(&mut self) -> Result<bool, Error> {
        if !self.queue.is_empty() {
            return Ok(false);
        }
        let Some(fd) = self.fd.as_ref() else {
            return Ok(true);
        };
        loop {
            let mut rfds = FdSet::new();
            rfds.insert(fd.as_fd());
            match select(None, Some(&mut rfds), None, None, None) {
                Ok(_) => return Ok(false),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read everything available without blocking, queueing whole messages.
    /// A short header or an invalid tag is fatal.
    pub fn drain(&mut self) -> Result<(), Error> {
        if self.fd.is_none() {
            return Ok(());
        }
        loop {
            let mut header = [0u8; HEADER_SIZE];
            match self.read_exact(&mut header, true)? {
                ReadStatus::WouldBlock => return Ok(()),
                ReadStatus::Eof => {
                    self.fd = None;
                    return Ok(());
                }
                ReadStatus::EofPartial => {
                    self.fd = None;
                    return Err(Error::Protocol("short message header"));
                }
                ReadStatus::Done => {}
            }

            let size = u32::from_ne_bytes(header[0..4].try_into().unwrap()) as usize;
            let raw_tag = u32::from_ne_bytes(header[4..8].try_into().unwrap());
            if size < HEADER_SIZE {
                return Err(Error::Protocol("message size shorter than its header"));
            }
            let tag = Tag::from_wire(raw_tag).ok_or(Error::Protocol("invalid message tag"))?;

            let mut payload = vec![0u8; size - HEADER_SIZE];
            if let ReadStatus::Eof | ReadStatus::EofPartial = self.read_exact(&mut payload, false)? {
                // EOF mid-message: drop the partial message and cope.
                self.fd = None;
                return Ok(());
            }

            self.queue.push_back(IpcMsg { tag, payload });
        }
    }

    /// Dequeue messages, running registered handlers, until an unhandled
    /// message surfaces (returned if `want_msg`) or the queue is empty.
    pub fn pop(&mut self, want_msg: bool) -> Result<Option<IpcMsg>, Error> {
        while let Some(msg) = self.queue.pop_front() {
            let idx = msg.tag.index();
            if let Some(mut handler) = self.handlers[idx].take() {
                let res = handler(self, msg);
                // the handler may have re-registered itself; don't clobber.
                if self.handlers[idx].is_none() {
                    self.handlers[idx] = Some(handler);
                }
                res?;
                continue;
            }
            if want_msg {
                return Ok(Some(msg));
            }
            log::trace!("discarding unhandled ipc message {:?}", msg.tag);
        }
        Ok(None)
    }

    /// Shut down the write side, drain until EOF, then run the queue dry.
    pub fn close(mut self) -> Result<(), Error> {
        if let Some(fd) = self.fd.as_ref() {
            // SAFETY: fd is a valid open socket for the lifetime of the call.
            unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_WR) };
            while self.fd.is_some() {
                self.wait()?;
                self.drain()?;
            }
        }
        self.pop(false)?;
        Ok(())
    }

    /// Read the full buffer. With `fail_fast`, EAGAIN before the first
    /// byte reports `WouldBlock`; after data has started arriving we poll
    /// for the rest, since a frame must never be torn.
    fn read_exact(&mut self, buf: &mut [u8], fail_fast: bool) -> Result<ReadStatus, Error> {
        let fd = self.fd.as_ref().ok_or(Error::Closed)?;
        let mut off = 0;
        while off < buf.len() {
            match nix::unistd::read(fd.as_fd(), &mut buf[off..]) {
                Ok(0) => {
                    if off > 0 {
                        return Ok(ReadStatus::EofPartial);
                    }
                    return Ok(ReadStatus::Eof);
                }
                Ok(n) => off += n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    if fail_fast && off == 0 {
                        return Ok(ReadStatus::WouldBlock);
                    }
                    poll_readable(fd)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ReadStatus::Done)
    }
}

enum ReadStatus {
    Done,
    WouldBlock,
    Eof,
    EofPartial,
}

fn poll_readable(fd: &OwnedFd) -> Result<(), Error> {
    loop {
        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write the whole buffer, polling for writability on EAGAIN.
fn full_write(fd: &OwnedFd, buf: &[u8]) -> Result<(), Error> {
    let mut off = 0;
    while off < buf.len() {
        match nix::unistd::write(fd.as_fd(), &buf[off..]) {
            Ok(n) => off += n,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => {
                loop {
                    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLOUT)];
                    match poll(&mut fds, PollTimeout::NONE) {
                        Ok(_) => break,
                        Err(Errno::EINTR) => continue,
                        Err(e) => return Err(Error::Os(e)),
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    fn pair() -> (IpcChannel, IpcChannel) {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        (IpcChannel::new(a), IpcChannel::new(b))
    }

    #[test]
    fn test_roundtrip() {
        let (mut a, mut b) = pair();
        a.send(Tag::Error, b"boom").unwrap();
        a.send_nodata(Tag::Release).unwrap();

        let msg = b.recv().unwrap().unwrap();
        assert_eq!(Tag::Error, msg.tag);
        assert_eq!(b"boom", &msg.payload[..]);

        let msg = b.recv().unwrap().unwrap();
        assert_eq!(Tag::Release, msg.tag);
        assert!(msg.payload.is_empty());

        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn test_handler_consumes_and_replies() {
        let (mut a, mut b) = pair();
        b.register(
            Tag::TermiosInquiry,
            Some(Box::new(|chan, _msg| chan.send_nodata(Tag::TermiosAck))),
        );

        a.send_nodata(Tag::TermiosInquiry).unwrap();
        assert!(b.recv().unwrap().is_none(), "handler consumed the inquiry");

        let reply = a.recv().unwrap().unwrap();
        assert_eq!(Tag::TermiosAck, reply.tag);
    }

    #[test]
    fn test_eof_leaves_queue_recoverable() {
        let (mut a, mut b) = pair();
        a.send_nodata(Tag::Release).unwrap();
        drop(a);

        // drain sees the message, then EOF; the queue stays recoverable.
        b.drain().unwrap();
        assert!(!b.okay());
        let msg = b.pop(true).unwrap();
        assert!(matches!(msg, Some(m) if m.tag == Tag::Release));
        assert!(matches!(b.send_nodata(Tag::Release), Err(Error::Closed)));
    }

    #[test]
    fn test_close_protocol() {
        let (a, mut b) = pair();
        drop(a);
        b.drain().unwrap();
        b.close().unwrap();
    }
}
