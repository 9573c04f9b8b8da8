//! Spawns and tracks the supervisor's child processes: the single detector
//! child, and one child per connected device.
//!
//! The original implementation tags each child's process handle with a
//! static sentinel pointer (`&detector_type` vs. `&device_type`) so that a
//! generic "walk every child" callback can tell them apart. We use a plain
//! tagged enum instead.

use std::io;
use std::process::{Child, Command, Stdio};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::codec::{IpcMessage, MessageReader};
use crate::error::DecodeError;

/// Distinguishes a detector child from a device child, without relying on
/// a sentinel pointer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRole {
    Detector,
    Device,
}

/// A spawned child process together with its non-blocking stdout pipe,
/// registered with the event loop under `token`.
#[derive(Debug)]
pub struct ManagedChild {
    pub role: ChildRole,
    pub token: Token,
    pub child: Child,
    stdout: std::process::ChildStdout,
    reader: MessageReader,
    #[cfg(unix)]
    stdout_fd: std::os::unix::io::RawFd,
}

impl ManagedChild {
    /// Spawn `exe arg` with stdin/stderr suppressed and stdout piped, set
    /// the pipe to non-blocking, and register it for readability.
    pub fn spawn(
        exe: &std::path::Path,
        arg: &str,
        role: ChildRole,
        token: Token,
        registry: &Registry,
    ) -> io::Result<ManagedChild> {
        let mut command = Command::new(exe);
        command.arg(arg).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        set_nonblocking(&stdout)?;
        #[cfg(unix)]
        let stdout_fd = stdout.as_raw_fd();

        let mut managed = ManagedChild {
            role,
            token,
            child,
            stdout,
            reader: MessageReader::new(),
            #[cfg(unix)]
            stdout_fd,
        };
        managed.source().register(registry, token, Interest::READABLE)?;
        Ok(managed)
    }

    /// Pull the next complete IPC message off the child's pipe, buffering
    /// across reads as needed. Returns `Err(DecodeError::WouldBlock)` once
    /// the pipe has no more data pending right now.
    pub fn read_message(&mut self) -> Result<IpcMessage, DecodeError> {
        self.reader.read_message(&mut self.stdout)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.source().deregister(registry)
    }

    #[cfg(unix)]
    fn source(&self) -> SourceFd<'_> {
        SourceFd(&self.stdout_fd)
    }
}

#[cfg(unix)]
fn set_nonblocking(stdout: &std::process::ChildStdout) -> io::Result<()> {
    let fd = stdout.as_raw_fd();
    // SAFETY: fd is owned by `stdout` and valid for the duration of this call.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

trait SourceFdExt {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()>;
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;
}

impl SourceFdExt for SourceFd<'_> {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        Source::register(self, registry, token, interest)
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        Source::deregister(self, registry)
    }
}
