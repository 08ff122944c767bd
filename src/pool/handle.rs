use std::{
    io,
    time::{Duration, Instant},
};

use log::{trace, warn};

use crate::transport::{Connector, Transport, TransportError};

use super::Pool;

/// A pooled connection and its bookkeeping.
#[derive(Debug)]
pub(crate) struct Handle<T> {
    pub(crate) id: u64,
    pub(crate) transport: T,
    alive: bool,
    idle_since: Instant,
}

impl<T: Transport> Handle<T> {
    pub(crate) fn new(id: u64, transport: T) -> Self {
        Self {
            id,
            transport,
            alive: true,
            idle_since: Instant::now(),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.idle_since = Instant::now();
    }
}

/// Exclusive checkout of one pooled connection.
///
/// The connection goes back to its pool exactly once: through [`release`](Self::release), or
/// when the guard is dropped. A guard dropped without an explicit release (early return,
/// panic while sending) cannot vouch for the connection's state, so the connection is closed.
pub struct PooledConnection<'a, C: Connector> {
    pool: &'a Pool<C>,
    handle: Option<Handle<C::Connection>>,
}

impl<'a, C: Connector> PooledConnection<'a, C> {
    pub(crate) fn new(pool: &'a Pool<C>, handle: Handle<C::Connection>) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Pool-unique id of the underlying connection.
    pub fn id(&self) -> u64 {
        self.handle.as_ref().map(|h| h.id).unwrap_or_default()
    }

    /// Sends one message. A failure marks the connection dead, so it will not be reused
    /// regardless of how it is released.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };

        match handle.transport.send(payload) {
            Ok(()) => {
                trace!("connection {} sent {} bytes", handle.id, payload.len());
                Ok(())
            }
            Err(e) => {
                handle.alive = false;
                Err(e)
            }
        }
    }

    /// Returns the connection to the pool. Unhealthy connections are closed instead of
    /// being kept idle.
    pub fn release(mut self, healthy: bool) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle, healthy);
        }
    }
}

impl<C: Connector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(
                "connection {} dropped without release, discarding it",
                handle.id
            );
            self.pool.release(handle, false);
        }
    }
}
