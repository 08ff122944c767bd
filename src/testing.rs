//! In-memory stand-ins for the network, shared by unit tests.
use std::{
    io::{self, Cursor, Read, Write},
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crate::transport::{
    Connector, Endpoint, Transport, TransportError, ZmtpTransport, greeting, ready_command,
};

/// Duplex stream: reads from a canned peer script, records every byte written.
#[derive(Debug, Default)]
pub(crate) struct FakeStream {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    interrupted: Arc<AtomicUsize>,
    /// Number of upcoming writes that fail with `Interrupted`.
    pub interrupts: usize,
}

impl FakeStream {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            ..Default::default()
        }
    }

    /// A stream whose peer completes the handshake as `socket_type`.
    pub fn with_peer(socket_type: &str) -> Self {
        let mut input = greeting().to_vec();
        input.extend(ready_command(socket_type));
        Self::new(input)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl Read for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.interrupts > 0 {
            self.interrupts -= 1;
            self.interrupted.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything a [`SpyConnector`] and its connections observed, plus knobs to make them fail.
#[derive(Debug, Default)]
pub(crate) struct Spy {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub sends: Mutex<Vec<Vec<u8>>>,
    pub fail_open: AtomicBool,
    /// When set, `open` waits on this barrier twice: once on entry and once before returning.
    pub open_gate: Mutex<Option<Arc<Barrier>>>,
    pub fail_send: AtomicBool,
    pub send_delay_ms: AtomicU64,
}

impl Spy {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sends.lock().unwrap().clone()
    }
}

pub(crate) struct SpyConnector {
    endpoint: Endpoint,
    spy: Arc<Spy>,
}

impl SpyConnector {
    pub fn new() -> (Self, Arc<Spy>) {
        let spy = Arc::new(Spy::default());
        let connector = Self {
            endpoint: "tcp://127.0.0.1:5555".parse().unwrap(),
            spy: Arc::clone(&spy),
        };
        (connector, spy)
    }
}

impl Connector for SpyConnector {
    type Connection = SpyConnection;

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn open(&self) -> Result<Self::Connection, TransportError> {
        let gate = self.spy.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        if self.spy.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        self.spy.opens.fetch_add(1, Ordering::SeqCst);
        Ok(SpyConnection {
            spy: Arc::clone(&self.spy),
        })
    }
}

#[derive(Debug)]
pub(crate) struct SpyConnection {
    spy: Arc<Spy>,
}

impl Transport for SpyConnection {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let delay = self.spy.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.spy.fail_send.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.spy.sends.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn close(self) -> Result<(), TransportError> {
        self.spy.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens real ZMTP transports over [`FakeStream`]s, each set to interrupt its first
/// `interrupts` message writes.
pub(crate) struct FakeStreamConnector {
    endpoint: Endpoint,
    pub interrupts: usize,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub interrupted: Arc<AtomicUsize>,
}

impl FakeStreamConnector {
    pub fn new(interrupts: usize) -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5555".parse().unwrap(),
            interrupts,
            written: Arc::default(),
            interrupted: Arc::default(),
        }
    }
}

impl Connector for FakeStreamConnector {
    type Connection = ZmtpTransport<FakeStream>;

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn open(&self) -> Result<Self::Connection, TransportError> {
        let mut stream = FakeStream::with_peer("PULL");
        stream.written = Arc::clone(&self.written);
        stream.interrupted = Arc::clone(&self.interrupted);

        let mut transport = ZmtpTransport::handshake(stream)?;
        self.written.lock().unwrap().clear();
        transport.get_mut().interrupts = self.interrupts;
        Ok(transport)
    }
}
