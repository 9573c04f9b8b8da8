//! Graceful shutdown on SIGINT/SIGTERM, wired into the `mio::Poll` event
//! loop via the self-pipe trick (`signal_hook::low_level::pipe`).
#![cfg(unix)]

use std::io::{self, Read};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use tracing::debug;

/// Registers a readable event on `token` whenever SIGINT or SIGTERM
/// arrives, via a self-pipe signal-hook wires up for us.
pub struct SignalSource {
    read: UnixStream,
    read_fd: RawFd,
    token: Token,
}

impl SignalSource {
    pub fn install(registry: &Registry, token: Token) -> io::Result<SignalSource> {
        let (read, write) = UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        signal_hook::low_level::pipe::register(signal_hook::consts::SIGINT, write.try_clone()?)?;
        signal_hook::low_level::pipe::register(signal_hook::consts::SIGTERM, write)?;

        let read_fd = read.as_raw_fd();
        let source = SignalSource { read, read_fd, token };
        source.source().register(registry, token, Interest::READABLE)?;
        Ok(source)
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Drain the self-pipe. Returns `true` if a shutdown signal arrived.
    pub fn consume(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 16];
        let mut received = false;
        loop {
            match self.read.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => received = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        if received {
            debug!("shutdown signal received");
        }
        Ok(received)
    }

    fn source(&self) -> SourceFd<'_> {
        SourceFd(&self.read_fd)
    }
}
