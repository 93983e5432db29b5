//! Terminal-attribute plumbing for the driver/child handshake.
//!
//! The termios structure crosses the IPC socket in the platform's native
//! layout; both endpoints are the same binary, so no translation is done
//! or needed.

use nix::sys::termios::{InputFlags, LocalFlags, OutputFlags, Termios};

/// Native-layout byte image of a termios structure.
pub fn termios_bytes(t: &Termios) -> Vec<u8> {
    let raw: libc::termios = t.clone().into();
    let size = std::mem::size_of::<libc::termios>();
    // SAFETY: termios is plain old data; we copy its bytes out.
    let bytes = unsafe { std::slice::from_raw_parts(&raw as *const _ as *const u8, size) };
    bytes.to_vec()
}

/// Rebuild a termios structure from its native byte image.
/// Returns None if the payload has the wrong size.
pub fn termios_from_bytes(bytes: &[u8]) -> Option<Termios> {
    if bytes.len() != std::mem::size_of::<libc::termios>() {
        return None;
    }
    // SAFETY: any bit pattern of the right size is a structurally valid
    // termios; bogus flag values are the kernel's to reject.
    let raw: libc::termios = unsafe {
        let mut raw = std::mem::zeroed::<libc::termios>();
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            &mut raw as *mut _ as *mut u8,
            bytes.len(),
        );
        raw
    };
    Some(raw.into())
}

/// The terminal flags a script can toggle with `stty NAME on|off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyFlag {
    Echo,
    Icanon,
    Isig,
    Icrnl,
    Opost,
    Onlcr,
}

impl TtyFlag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(Self::Echo),
            "icanon" => Some(Self::Icanon),
            "isig" => Some(Self::Isig),
            "icrnl" => Some(Self::Icrnl),
            "opost" => Some(Self::Opost),
            "onlcr" => Some(Self::Onlcr),
            _ => None,
        }
    }

    pub fn apply(self, t: &mut Termios, on: bool) {
        match self {
            Self::Echo => t.local_flags.set(LocalFlags::ECHO, on),
            Self::Icanon => t.local_flags.set(LocalFlags::ICANON, on),
            Self::Isig => t.local_flags.set(LocalFlags::ISIG, on),
            Self::Icrnl => t.input_flags.set(InputFlags::ICRNL, on),
            Self::Opost => t.output_flags.set(OutputFlags::OPOST, on),
            Self::Onlcr => t.output_flags.set(OutputFlags::ONLCR, on),
        }
    }
}
