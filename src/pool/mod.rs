//! Bounded pool of outbound connections to a single sink.
//!
//! The pool hands out exclusive [`PooledConnection`]s, opening new ones lazily on demand and
//! recycling healthy ones across calls. It never queues callers: once `max` connections
//! exist and none is idle, [`Pool::acquire`] fails immediately with
//! [`PoolError::Exhausted`] so a slow or unreachable sink can never stall request processing.
//!
//! # Locking
//!
//! All bookkeeping (the idle list, the active count, the closed flag) lives behind one mutex.
//! Critical sections are short and never perform I/O: connecting, sending and closing happen
//! after the lock is dropped. A new connection reserves its slot under the lock before
//! connecting, so `active <= max` holds at every instant.
//!
//! # Health
//!
//! A connection released as unhealthy is closed and its slot freed; the next `acquire`
//! reconnects. Idle connections are only proven alive by the next send, so a stale idle
//! connection costs exactly one failed send. With an `idle_timeout`, connections idle for
//! longer are closed on the next `acquire` instead of being reused.
//!
//! # Shutdown
//!
//! [`Pool::shutdown`] closes idle connections and refuses further checkouts. Connections that
//! are checked out at that moment are closed as soon as their guard is released, so every
//! connection is closed exactly once.
mod handle;

use std::{
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::transport::{Connector, Endpoint, Transport, TransportError};

use handle::Handle;

pub use handle::PooledConnection;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("all {max} connections are in use")]
    Exhausted { max: usize },

    #[error("pool is closed")]
    Closed,

    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] TransportError),
}

/// Pool sizing and connection lifetime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections, idle or checked out.
    pub max: usize,
    /// Connections opened by [`Pool::prime`].
    pub start: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: 1,
            start: 1,
            idle_timeout: None,
        }
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub active: usize,
    pub idle: usize,
    pub max: usize,
    pub closed: bool,
}

#[derive(Debug)]
struct PoolState<T> {
    idle: Vec<Handle<T>>,
    active: usize,
    next_id: u64,
    closed: bool,
}

enum Checkout<T> {
    Idle(Handle<T>),
    Open(u64),
    Exhausted,
}

pub struct Pool<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(config.max),
                active: 0,
                next_id: 0,
                closed: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connector.endpoint()
    }

    /// Checks out a connection, reusing an idle one when possible.
    ///
    /// Never waits for another caller to release: a pool at capacity fails with
    /// [`PoolError::Exhausted`]. A failed connect is reported as
    /// [`PoolError::ConnectFailed`] and is not retried.
    pub fn acquire(&self) -> Result<PooledConnection<'_, C>, PoolError> {
        let (checkout, expired) = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let expired = match self.config.idle_timeout {
                Some(timeout) => {
                    let (expired, fresh): (Vec<_>, Vec<_>) = mem::take(&mut state.idle)
                        .into_iter()
                        .partition(|h| h.idle_for() >= timeout);
                    state.idle = fresh;
                    state.active -= expired.len();
                    expired
                }
                None => Vec::new(),
            };

            let checkout = if let Some(handle) = state.idle.pop() {
                Checkout::Idle(handle)
            } else if state.active < self.config.max {
                state.active += 1;
                state.next_id += 1;
                Checkout::Open(state.next_id)
            } else {
                Checkout::Exhausted
            };
            (checkout, expired)
        };

        for handle in expired {
            debug!("connection {} exceeded idle timeout", handle.id);
            self.close(handle);
        }

        match checkout {
            Checkout::Idle(handle) => {
                debug!("reusing connection {}", handle.id);
                Ok(PooledConnection::new(self, handle))
            }
            Checkout::Open(id) => self.open(id),
            Checkout::Exhausted => Err(PoolError::Exhausted {
                max: self.config.max,
            }),
        }
    }

    /// Opens `start` connections up front and parks them idle.
    pub fn prime(&self) -> Result<(), PoolError> {
        let mut opened = Vec::with_capacity(self.config.start);
        for _ in 0..self.config.start.min(self.config.max) {
            opened.push(self.acquire()?);
        }
        for conn in opened {
            conn.release(true);
        }
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            active: state.active,
            idle: state.idle.len(),
            max: self.config.max,
            closed: state.closed,
        }
    }

    /// Closes idle connections and refuses further checkouts. Idempotent.
    pub fn shutdown(&self) {
        let idle = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle = mem::take(&mut state.idle);
            state.active -= idle.len();
            idle
        };

        info!(
            "shutting down pool for {}, closing {} idle connections",
            self.endpoint(),
            idle.len()
        );
        for handle in idle {
            self.close(handle);
        }
    }

    fn open(&self, id: u64) -> Result<PooledConnection<'_, C>, PoolError> {
        let transport = match self.connector.open() {
            Ok(transport) => transport,
            Err(e) => {
                self.lock().active -= 1;
                warn!("failed to connect to '{}': {e}", self.endpoint());
                return Err(PoolError::ConnectFailed(e));
            }
        };

        let handle = Handle::new(id, transport);
        if self.lock().closed {
            // Shut down while we were connecting; the slot was never handed out.
            self.release(handle, false);
            return Err(PoolError::Closed);
        }

        debug!("opened connection {id} to {}", self.endpoint());
        Ok(PooledConnection::new(self, handle))
    }

    pub(crate) fn release(&self, mut handle: Handle<C::Connection>, healthy: bool) {
        let discard = {
            let mut state = self.lock();
            if healthy && handle.is_alive() && !state.closed {
                handle.touch();
                state.idle.push(handle);
                None
            } else {
                state.active -= 1;
                Some(handle)
            }
        };

        if let Some(handle) = discard {
            debug!("discarding connection {}", handle.id);
            self.close(handle);
        }
    }

    fn close(&self, handle: Handle<C::Connection>) {
        let id = handle.id;
        if let Err(e) = handle.transport.close() {
            error!(
                "ungraceful close of connection {id} to '{}': {e}",
                self.endpoint()
            );
        }
    }

    // Every critical section leaves the state consistent, so a panic elsewhere while the
    // lock was held does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connector> Drop for Pool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
