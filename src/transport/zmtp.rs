use std::io::{self, Read, Write};

use log::{debug, trace, warn};

use super::{Transport, TransportError};

pub(crate) const GREETING_SIZE: usize = 64;
const SIGNATURE_START: u8 = 0xFF;
const SIGNATURE_END: u8 = 0x7F;
const VERSION_MAJOR: u8 = 3;
const VERSION_MINOR: u8 = 0;
const MECHANISM_NULL: &[u8] = b"NULL";
const MECHANISM_OFFSET: usize = 12;
const MECHANISM_SIZE: usize = 20;

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;

const SOCKET_TYPE: &str = "PUSH";
const PEER_SOCKET_TYPE: &str = "PULL";

/// Consecutive `Interrupted` errors tolerated on a single write before giving up.
const MAX_INTERRUPTS: usize = 3;

/// Local greeting; we never act as server and only offer the NULL mechanism.
pub(crate) fn greeting() -> [u8; GREETING_SIZE] {
    let mut greeting = [0u8; GREETING_SIZE];
    greeting[0] = SIGNATURE_START;
    greeting[8] = 0x01;
    greeting[9] = SIGNATURE_END;
    greeting[10] = VERSION_MAJOR;
    greeting[11] = VERSION_MINOR;
    greeting[MECHANISM_OFFSET..MECHANISM_OFFSET + MECHANISM_NULL.len()]
        .copy_from_slice(MECHANISM_NULL);
    greeting
}

/// A complete `READY` command frame announcing `socket_type`.
pub(crate) fn ready_command(socket_type: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(32);
    body.push(5);
    body.extend_from_slice(b"READY");
    write_property(&mut body, "Socket-Type", socket_type.as_bytes());

    let mut frame = frame_header(FLAG_COMMAND, body.len());
    frame.extend_from_slice(&body);
    frame
}

fn write_property(body: &mut Vec<u8>, name: &str, value: &[u8]) {
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(&(value.len() as u32).to_be_bytes());
    body.extend_from_slice(value);
}

pub(crate) fn frame_header(flags: u8, size: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(9 + size);
    if size <= u8::MAX as usize {
        header.push(flags);
        header.push(size as u8);
    } else {
        header.push(flags | FLAG_LONG);
        header.extend_from_slice(&(size as u64).to_be_bytes());
    }
    header
}

/// One ZMTP 3.0 PUSH connection over any byte stream.
///
/// Construction performs the full handshake, so a value of this type always
/// represents a peer that has accepted us as a PUSH socket. Every [`send`](Self::send_message)
/// writes exactly one single-part message frame.
#[derive(Debug)]
pub struct ZmtpTransport<S: Read + Write> {
    stream: S,
    peer_socket_type: Option<String>,
}

impl<S: Read + Write> ZmtpTransport<S> {
    pub fn handshake(mut stream: S) -> Result<Self, TransportError> {
        write_fully(&mut stream, &greeting())?;
        stream.flush()?;

        let mut peer = [0u8; GREETING_SIZE];
        stream.read_exact(&mut peer)?;
        check_greeting(&peer)?;
        trace!("peer greeting accepted, version {}.{}", peer[10], peer[11]);

        write_fully(&mut stream, &ready_command(SOCKET_TYPE))?;
        stream.flush()?;

        let peer_socket_type = read_ready(&mut stream)?;
        match peer_socket_type.as_deref() {
            Some(kind) if !kind.eq_ignore_ascii_case(PEER_SOCKET_TYPE) => {
                return Err(TransportError::Handshake(format!(
                    "peer socket type '{kind}' cannot accept messages from a {SOCKET_TYPE} socket"
                )));
            }
            None => warn!("peer did not announce a socket type"),
            _ => {}
        }

        Ok(Self {
            stream,
            peer_socket_type,
        })
    }

    pub fn send_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = frame_header(0, payload.len());
        frame.extend_from_slice(payload);

        write_fully(&mut self.stream, &frame)?;
        self.stream.flush()?;
        trace!("wrote {} byte frame", frame.len());
        Ok(())
    }

    pub fn peer_socket_type(&self) -> Option<&str> {
        self.peer_socket_type.as_deref()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Read + Write + Send> Transport for ZmtpTransport<S> {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_message(payload)
    }

    fn close(mut self) -> Result<(), TransportError> {
        self.stream.flush()?;
        Ok(())
    }
}

fn check_greeting(peer: &[u8; GREETING_SIZE]) -> Result<(), TransportError> {
    if peer[0] != SIGNATURE_START || peer[9] & 0x01 != 0x01 {
        return Err(TransportError::Handshake(
            "peer is not a ZMTP endpoint".to_string(),
        ));
    }
    if peer[10] < VERSION_MAJOR {
        return Err(TransportError::Handshake(format!(
            "unsupported ZMTP version {}.{}",
            peer[10], peer[11]
        )));
    }

    let mechanism = &peer[MECHANISM_OFFSET..MECHANISM_OFFSET + MECHANISM_SIZE];
    let mechanism = mechanism.split(|b| *b == 0).next().unwrap_or_default();
    if mechanism != MECHANISM_NULL {
        return Err(TransportError::Handshake(format!(
            "unsupported security mechanism '{}'",
            String::from_utf8_lossy(mechanism)
        )));
    }
    Ok(())
}

/// Reads the peer's `READY` command and returns its `Socket-Type` property.
fn read_ready<R: Read>(stream: &mut R) -> Result<Option<String>, TransportError> {
    let mut flags = [0u8; 1];
    stream.read_exact(&mut flags)?;
    let flags = flags[0];

    let size = if flags & FLAG_LONG != 0 {
        let mut size = [0u8; 8];
        stream.read_exact(&mut size)?;
        u64::from_be_bytes(size) as usize
    } else {
        let mut size = [0u8; 1];
        stream.read_exact(&mut size)?;
        size[0] as usize
    };

    if flags & FLAG_COMMAND == 0 || flags & FLAG_MORE != 0 {
        return Err(TransportError::Handshake(format!(
            "expected a command frame, got flags {flags:#04x}"
        )));
    }
    // A READY with metadata never comes close to this; refuse to buffer garbage.
    if size > u16::MAX as usize {
        return Err(TransportError::Handshake(format!(
            "command frame of {size} bytes is too large"
        )));
    }

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body)?;
    parse_ready(&body)
}

fn parse_ready(body: &[u8]) -> Result<Option<String>, TransportError> {
    let malformed = || TransportError::Handshake("malformed command frame".to_string());

    let (&name_len, rest) = body.split_first().ok_or_else(malformed)?;
    let name = rest.get(..name_len as usize).ok_or_else(malformed)?;
    let mut rest = &rest[name_len as usize..];

    match name {
        b"READY" => {}
        b"ERROR" => {
            let reason = rest
                .get(1..)
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            return Err(TransportError::Handshake(format!(
                "peer rejected connection: {reason}"
            )));
        }
        other => {
            return Err(TransportError::Handshake(format!(
                "expected READY command, got '{}'",
                String::from_utf8_lossy(other)
            )));
        }
    }

    let mut socket_type = None;
    while let Some((&len, tail)) = rest.split_first() {
        let key = tail.get(..len as usize).ok_or_else(malformed)?;
        let tail = &tail[len as usize..];
        let value_len = tail
            .get(..4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(malformed)?;
        let value = tail.get(4..4 + value_len).ok_or_else(malformed)?;

        if key.eq_ignore_ascii_case(b"Socket-Type") {
            socket_type = Some(String::from_utf8_lossy(value).into_owned());
        } else {
            debug!("ignoring peer property '{}'", String::from_utf8_lossy(key));
        }
        rest = &tail[4 + value_len..];
    }

    Ok(socket_type)
}

/// Like [`Write::write_all`], but an interrupted write is retried once per
/// interruption and only [`MAX_INTERRUPTS`] times in a row.
pub(crate) fn write_fully<W: Write>(writer: &mut W, mut buf: &[u8]) -> Result<(), TransportError> {
    let mut interrupts = 0;
    while !buf.is_empty() {
        match writer.write(buf) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                buf = &buf[n..];
                interrupts = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                interrupts += 1;
                if interrupts > MAX_INTERRUPTS {
                    return Err(TransportError::Interrupted(interrupts));
                }
                debug!("write interrupted, retrying ({interrupts}/{MAX_INTERRUPTS})");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
