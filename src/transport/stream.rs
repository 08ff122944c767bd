use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use log::{debug, info};

use super::{Connector, Endpoint, TransportError, ZmtpTransport};

/// Time left before `deadline`, or `None` once it has passed.
fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

/// A connected byte stream to the sink, whatever the endpoint scheme.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Connects to `endpoint`. Resolved addresses are tried in turn, all within one `timeout`
    /// budget.
    ///
    /// Name resolution itself runs before the budget starts and is bounded only by the system
    /// resolver. Unix socket connects are local and never wait on a peer, so they take no
    /// timeout.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let addrs = (host.as_str(), *port).to_socket_addrs()?;
                let deadline = Instant::now() + timeout;
                let mut last_err = None;
                for addr in addrs {
                    let Some(left) = remaining(deadline) else {
                        last_err = Some(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect to '{host}' timed out"),
                        ));
                        break;
                    };
                    match TcpStream::connect_timeout(&addr, left) {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            return Ok(Stream::Tcp(stream));
                        }
                        Err(e) => {
                            debug!("connect to {addr} failed: {e}");
                            last_err = Some(e);
                        }
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("'{host}' resolved to no addresses"),
                    )
                }))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => UnixStream::connect(path).map(Stream::Unix),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Stream::Unix(s) => s.set_write_timeout(timeout),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// Opens PUSH connections to one sink.
///
/// The TCP connect, across every resolved address, and the handshake are each bounded by
/// `connect_timeout`; once established, each send is bounded by `send_timeout`.
#[derive(Debug, Clone)]
pub struct PushConnector {
    endpoint: Endpoint,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl PushConnector {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            send_timeout,
        }
    }
}

impl Connector for PushConnector {
    type Connection = ZmtpTransport<Stream>;

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn open(&self) -> Result<Self::Connection, TransportError> {
        let stream = Stream::connect(&self.endpoint, self.connect_timeout).map_err(|source| {
            TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            }
        })?;
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        let transport = ZmtpTransport::handshake(stream)?;
        transport
            .get_ref()
            .set_write_timeout(Some(self.send_timeout))?;

        info!("connected to {}", self.endpoint);
        Ok(transport)
    }
}
