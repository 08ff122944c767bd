//! Per-request message dispatch.
//!
//! A [`Dispatcher`] ties one encoding mode to one connection pool. Each call to
//! [`Dispatcher::dispatch`] runs the same short sequence and reports a tri-state outcome:
//!
//! 1. Size check and encode. Failure here is [`DispatchResult::Failed`] and never touches the
//!    pool.
//! 2. Acquire a connection. An exhausted, closed or unreachable pool yields
//!    [`DispatchResult::Skipped`]; the caller's request carries on without the message.
//! 3. Send once. The connection is released healthy on success, and discarded on failure so
//!    that the next call reconnects. A failed send is never retried by the dispatcher.
//!
//! No state survives between calls apart from the pool itself, so a dispatcher can be shared
//! freely between threads.
use std::sync::Arc;

use log::{debug, error, warn};
use thiserror::Error;

use crate::{
    config::{ConfigError, Settings},
    encoder::{self, EncodeError, EncodingMode},
    pool::{Pool, PoolStatus},
    transport::{Connector, PushConnector, TransportError},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("conversion failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to send message: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of one dispatch, for the host to map onto its own result codes.
#[derive(Debug)]
pub enum DispatchResult {
    Sent,
    Skipped,
    Failed(DispatchError),
}

impl DispatchResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchResult::Sent)
    }
}

pub struct Dispatcher<C: Connector = PushConnector> {
    pool: Arc<Pool<C>>,
    mode: EncodingMode,
    max_payload: usize,
}

impl Dispatcher<PushConnector> {
    /// Builds the connector and pool described by `settings`. Unless connections are lazy,
    /// the pool is primed here and a sink that cannot be reached aborts construction.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let connector = PushConnector::new(
            settings.endpoint.clone(),
            settings.connect_timeout,
            settings.send_timeout,
        );
        let pool = Pool::new(connector, settings.pool);

        if !settings.lazy_connect {
            pool.prime().map_err(ConfigError::InitialConnect)?;
        }

        Ok(Self::with_pool(
            Arc::new(pool),
            settings.mode,
            settings.max_payload,
        ))
    }
}

impl<C: Connector> Dispatcher<C> {
    /// A dispatcher over an existing, possibly shared, pool.
    pub fn with_pool(pool: Arc<Pool<C>>, mode: EncodingMode, max_payload: usize) -> Self {
        Self {
            pool,
            mode,
            max_payload,
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn dispatch(&self, rendered: &[u8]) -> DispatchResult {
        if rendered.len() > self.max_payload {
            let err = DispatchError::PayloadTooLarge {
                size: rendered.len(),
                limit: self.max_payload,
            };
            error!("{err}");
            return DispatchResult::Failed(err);
        }

        let message = match encoder::encode(rendered, self.mode) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    "{} conversion failed for '{}': {e}",
                    self.mode,
                    String::from_utf8_lossy(rendered)
                );
                return DispatchResult::Failed(e.into());
            }
        };

        let mut conn = match self.pool.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("skipping message for {}: {e}", self.pool.endpoint());
                return DispatchResult::Skipped;
            }
        };

        match conn.send(&message) {
            Ok(()) => {
                debug!("sent {} bytes on connection {}", message.len(), conn.id());
                conn.release(true);
                DispatchResult::Sent
            }
            Err(e) => {
                error!("failed to send message on connection {}: {e}", conn.id());
                conn.release(false);
                DispatchResult::Failed(e.into())
            }
        }
    }

    /// Tears down the pool. Later dispatches are skipped.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
