pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod export;
pub mod pool;
pub mod transport;
pub mod workers;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, Settings};
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use encoder::{EncodeError, EncodingMode, encode};
pub use export::{Summary, export_lines};
pub use pool::{Pool, PoolConfig, PoolError, PooledConnection};
pub use transport::{Connector, Endpoint, PushConnector, Transport, TransportError};
