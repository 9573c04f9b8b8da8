//! The IPC wire format carried on the anonymous pipe between the supervisor
//! and its detector/device children.
//!
//! Each message is a 4-byte little-endian type tag followed by a
//! variant-specific payload. Strings are NUL-terminated; a `u16` port is
//! padded out to 4-byte alignment. A message must fit in a single pipe
//! write so that delivery is atomic: we size our scratch buffer well under
//! the smallest platform `PIPE_BUF` to keep that assumption true. Atomic
//! writes only guarantee one message is never torn apart *within* a single
//! `write()`; several quick writes can still coalesce into one `read()` on
//! the other end, and a burst can also outrun a single `read()`. So we
//! always decode through [`MessageReader`], which buffers across reads and
//! peels off exactly one complete message at a time.

use std::io::{self, Read, Write};

use crate::error::DecodeError;

/// Upper bound on one encoded message. Comfortably below the 4096-byte
/// `PIPE_BUF` guaranteed atomic on Linux, and the analogous Windows pipe
/// buffer granted by `CreateNamedPipe`.
const MAX_MESSAGE_LEN: usize = 1024;

const TYPE_DEVICE_CONNECTION: u32 = 0;
const TYPE_DEVICE_DISCONNECTION: u32 = 1;
const TYPE_OSC_PORT_CHANGE: u32 = 2;
const TYPE_DEVICE_INFO: u32 = 3;
const TYPE_DEVICE_READY: u32 = 4;

/// One message on the supervisor-facing pipe. Sent child -> parent only;
/// the supervisor never writes anything back on this pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    /// Emitted by the detector only, once per discovered or arriving device.
    DeviceConnection { devnode: String },
    /// Emitted optionally by a device subprocess. Treated as a no-op by the
    /// supervisor: process exit is authoritative for disconnection.
    DeviceDisconnection,
    /// Emitted by a device subprocess whenever its OSC port changes.
    OscPortChange { port: u16 },
    /// Emitted by a device subprocess exactly once, before `DeviceReady`.
    DeviceInfo { serial: String, friendly: String },
    /// Emitted by a device subprocess exactly once, after `DeviceInfo`.
    DeviceReady,
}

impl IpcMessage {
    /// Write this message as a single atomic pipe write.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(64);
        match self {
            IpcMessage::DeviceConnection { devnode } => {
                buf.extend_from_slice(&TYPE_DEVICE_CONNECTION.to_le_bytes());
                push_cstr(&mut buf, devnode);
            }
            IpcMessage::DeviceDisconnection => {
                buf.extend_from_slice(&TYPE_DEVICE_DISCONNECTION.to_le_bytes());
            }
            IpcMessage::OscPortChange { port } => {
                buf.extend_from_slice(&TYPE_OSC_PORT_CHANGE.to_le_bytes());
                buf.extend_from_slice(&port.to_le_bytes());
                buf.extend_from_slice(&[0u8; 2]); // pad to 4-byte alignment
            }
            IpcMessage::DeviceInfo { serial, friendly } => {
                buf.extend_from_slice(&TYPE_DEVICE_INFO.to_le_bytes());
                push_cstr(&mut buf, serial);
                push_cstr(&mut buf, friendly);
            }
            IpcMessage::DeviceReady => {
                buf.extend_from_slice(&TYPE_DEVICE_READY.to_le_bytes());
            }
        }
        debug_assert!(buf.len() <= MAX_MESSAGE_LEN, "ipc message exceeds atomic write bound");
        w.write_all(&buf)
    }
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Looks for a NUL in `buf[*pos..]`. `Ok(None)` means the terminator
/// hasn't arrived yet, not that anything is malformed; invalid UTF-8 ahead
/// of a terminator we did find is the only real decode error here.
fn take_cstr(buf: &[u8], pos: &mut usize) -> Result<Option<String>, DecodeError> {
    let start = *pos;
    let Some(nul) = buf[start..].iter().position(|&b| b == 0) else {
        return Ok(None);
    };
    let s = std::str::from_utf8(&buf[start..start + nul])
        .map_err(|e| DecodeError::Malformed {
            reason: format!("non-utf8 string: {e}"),
        })?
        .to_owned();
    *pos = start + nul + 1;
    Ok(Some(s))
}

fn take_u16_padded(buf: &[u8], pos: &mut usize) -> Option<u16> {
    let bytes = buf.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Attempt to decode exactly one message from the front of `buf`.
///
/// `Ok(None)` means `buf` is a valid but incomplete prefix of a message —
/// the caller should read more bytes and try again. `Ok(Some((msg, n)))`
/// means a complete message was decoded, consuming `n` bytes.
fn take_message(buf: &[u8]) -> Result<Option<(IpcMessage, usize)>, DecodeError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let ty = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let mut pos = 4usize;
    let msg = match ty {
        TYPE_DEVICE_CONNECTION => match take_cstr(buf, &mut pos)? {
            Some(devnode) => IpcMessage::DeviceConnection { devnode },
            None => return Ok(None),
        },
        TYPE_DEVICE_DISCONNECTION => IpcMessage::DeviceDisconnection,
        TYPE_OSC_PORT_CHANGE => match take_u16_padded(buf, &mut pos) {
            Some(port) => IpcMessage::OscPortChange { port },
            None => return Ok(None),
        },
        TYPE_DEVICE_INFO => {
            let serial = match take_cstr(buf, &mut pos)? {
                Some(s) => s,
                None => return Ok(None),
            };
            let friendly = match take_cstr(buf, &mut pos)? {
                Some(s) => s,
                None => return Ok(None),
            };
            IpcMessage::DeviceInfo { serial, friendly }
        }
        TYPE_DEVICE_READY => IpcMessage::DeviceReady,
        other => {
            return Err(DecodeError::Malformed {
                reason: format!("unknown message type {other}"),
            })
        }
    };
    Ok(Some((msg, pos)))
}

/// Decodes messages off a child's pipe one at a time, retaining whatever
/// trailing bytes a `read()` left short of a complete message so the next
/// call picks up where it left off.
///
/// A device subprocess's `DeviceInfo`/`OscPortChange`/`DeviceReady` burst
/// commonly coalesces into a single `read()`, and a large enough burst can
/// also span more than one `read()`; without this buffering, only the
/// first message of a burst would ever surface and the rest would be lost.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        MessageReader::default()
    }

    /// Return the next fully-decoded message, reading from `r` as needed.
    /// Surfaces `DecodeError::WouldBlock` when a non-blocking pipe has
    /// nothing left to read right now, and `DecodeError::Eof` once the
    /// pipe closes with no partial message pending.
    pub fn read_message<R: Read>(&mut self, r: &mut R) -> Result<IpcMessage, DecodeError> {
        loop {
            if let Some((msg, consumed)) = take_message(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(msg);
            }

            let mut scratch = [0u8; MAX_MESSAGE_LEN];
            match r.read(&mut scratch) {
                Ok(0) => {
                    return if self.buf.is_empty() {
                        Err(DecodeError::Eof)
                    } else {
                        Err(DecodeError::Malformed {
                            reason: "pipe closed with a partial message pending".into(),
                        })
                    };
                }
                Ok(n) => self.buf.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(DecodeError::WouldBlock),
                Err(e) => return Err(DecodeError::Io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn roundtrip(msg: IpcMessage) {
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let (decoded, consumed) = take_message(&buf).unwrap().unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(IpcMessage::DeviceConnection {
            devnode: "/dev/ttyUSB0".into(),
        });
        roundtrip(IpcMessage::DeviceDisconnection);
        roundtrip(IpcMessage::OscPortChange { port: 14000 });
        roundtrip(IpcMessage::DeviceInfo {
            serial: "m1000001".into(),
            friendly: "monome 64".into(),
        });
        roundtrip(IpcMessage::DeviceReady);
    }

    #[test]
    fn rejects_unknown_type() {
        let buf = 255u32.to_le_bytes();
        match take_message(&buf) {
            Err(DecodeError::Malformed { .. }) => {}
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_incomplete_not_malformed() {
        let mut buf = TYPE_DEVICE_CONNECTION.to_le_bytes().to_vec();
        buf.extend_from_slice(b"no-nul-here");
        assert!(take_message(&buf).unwrap().is_none());
    }

    struct ReadQueue(VecDeque<Vec<u8>>);

    impl Read for ReadQueue {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    #[test]
    fn eof_on_empty_read() {
        struct Empty;
        impl Read for Empty {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let mut reader = MessageReader::new();
        match reader.read_message(&mut Empty) {
            Err(DecodeError::Eof) => {}
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[test]
    fn pipe_closed_mid_message_is_malformed() {
        struct Once(Option<Vec<u8>>);
        impl Read for Once {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.take() {
                    Some(bytes) => {
                        buf[..bytes.len()].copy_from_slice(&bytes);
                        Ok(bytes.len())
                    }
                    None => Ok(0),
                }
            }
        }
        let mut partial = TYPE_DEVICE_CONNECTION.to_le_bytes().to_vec();
        partial.extend_from_slice(b"no-nul-here");
        let mut reader = MessageReader::new();
        match reader.read_message(&mut Once(Some(partial))) {
            Err(DecodeError::Malformed { .. }) => {}
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn would_block_surfaces_as_decode_error() {
        struct Blocking;
        impl Read for Blocking {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }
        let mut reader = MessageReader::new();
        match reader.read_message(&mut Blocking) {
            Err(DecodeError::WouldBlock) => {}
            other => panic!("expected would-block, got {other:?}"),
        }
    }

    #[test]
    fn coalesced_burst_yields_every_message_in_order() {
        let mut burst = Vec::new();
        IpcMessage::DeviceInfo {
            serial: "m1000001".into(),
            friendly: "monome 64".into(),
        }
        .write_to(&mut burst)
        .unwrap();
        IpcMessage::OscPortChange { port: 14000 }.write_to(&mut burst).unwrap();
        IpcMessage::DeviceReady.write_to(&mut burst).unwrap();

        let mut source = ReadQueue(VecDeque::from(vec![burst]));
        let mut reader = MessageReader::new();
        assert_eq!(
            reader.read_message(&mut source).unwrap(),
            IpcMessage::DeviceInfo {
                serial: "m1000001".into(),
                friendly: "monome 64".into(),
            }
        );
        assert_eq!(reader.read_message(&mut source).unwrap(), IpcMessage::OscPortChange { port: 14000 });
        assert_eq!(reader.read_message(&mut source).unwrap(), IpcMessage::DeviceReady);
        match reader.read_message(&mut source) {
            Err(DecodeError::WouldBlock) => {}
            other => panic!("expected would-block once the burst is drained, got {other:?}"),
        }
    }

    #[test]
    fn message_split_across_reads_is_reassembled() {
        let mut encoded = Vec::new();
        IpcMessage::DeviceConnection {
            devnode: "/dev/ttyUSB0".into(),
        }
        .write_to(&mut encoded)
        .unwrap();
        let split = encoded.len() / 2;
        let mut source = ReadQueue(VecDeque::from(vec![encoded[..split].to_vec(), encoded[split..].to_vec()]));

        // Both halves are available back-to-back, so one logical call
        // reassembles the full message across the two physical reads.
        let mut reader = MessageReader::new();
        assert_eq!(
            reader.read_message(&mut source).unwrap(),
            IpcMessage::DeviceConnection {
                devnode: "/dev/ttyUSB0".into()
            }
        );
        match reader.read_message(&mut source) {
            Err(DecodeError::WouldBlock) => {}
            other => panic!("expected would-block once the pipe is drained, got {other:?}"),
        }
    }
}
