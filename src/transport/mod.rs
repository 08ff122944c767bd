//! Outbound socket transport.
//!
//! This module owns everything needed to move one encoded message onto the wire: parsing the
//! sink [`Endpoint`], opening a physical stream to it, and speaking enough of the ZeroMQ
//! transport protocol (ZMTP 3.0, NULL mechanism) to act as a PUSH socket towards a PULL peer.
//!
//! # Overview
//!
//! A connection is opened through a [`Connector`], which yields a [`Transport`]. The pool only
//! ever talks to these two traits, so tests can swap in spies without touching the network.
//!
//! - [`PushConnector`]: the production connector; TCP or Unix-domain stream plus handshake.
//! - [`ZmtpTransport`]: framing over any `Read + Write` stream.
//!
//! # Wire Format
//!
//! - Both sides exchange a fixed 64-byte greeting (signature, version, mechanism).
//! - Both sides then send a `READY` command carrying their `Socket-Type`.
//! - Each message is a single frame: a flags byte, a 1-byte size (bodies up to 255 bytes) or an
//!   8-byte big-endian size, then the body. No application framing is added.
//!
//! # Failure Semantics
//!
//! `send` either hands the whole frame to the OS or returns an error; after an error the
//! connection must be considered unusable, since the peer may have seen a partial frame.
//! Closing is best-effort.
mod endpoint;
mod stream;
mod zmtp;

use std::io;

use thiserror::Error;

pub use endpoint::{Endpoint, EndpointError};
pub use stream::{PushConnector, Stream};
pub use zmtp::ZmtpTransport;

#[cfg(test)]
pub(crate) use zmtp::{greeting, ready_command};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("write interrupted {0} times in a row")]
    Interrupted(usize),

    #[error("could not connect to '{endpoint}': {source}")]
    Connect {
        endpoint: Endpoint,
        source: io::Error,
    },
}

/// One physical, exclusively owned connection to the sink.
pub trait Transport: Send {
    /// Hands one complete message to the transport.
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Releases the underlying OS resource. The connection is gone whether or not this
    /// reports an error.
    fn close(self) -> Result<(), TransportError>;
}

/// Opens new connections to a single, fixed endpoint.
pub trait Connector: Send + Sync {
    type Connection: Transport;

    fn endpoint(&self) -> &Endpoint;

    fn open(&self) -> Result<Self::Connection, TransportError>;
}
