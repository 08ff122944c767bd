use std::{fmt, str::FromStr};

#[cfg(unix)]
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("missing '://' scheme separator")]
    MissingScheme,

    #[error("unsupported transport scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("expected 'host:port', got '{0}'")]
    MissingPort(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("missing host")]
    MissingHost,

    #[error("missing socket path")]
    MissingPath,
}

/// Address of the remote sink, written as a ZeroMQ-style URI.
///
/// `tcp://host:port` is accepted everywhere; `ipc:///path/to/socket` only on unix
/// targets. Wildcard hosts (`*`) make no sense for a connecting socket and are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp {
        host: String,
        port: u16,
    },
    #[cfg(unix)]
    Ipc(PathBuf),
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (scheme, rest) = s.split_once("://").ok_or(EndpointError::MissingScheme)?;
        match scheme.to_lowercase().as_str() {
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| EndpointError::MissingPort(rest.to_string()))?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if host.is_empty() || host == "*" {
                    return Err(EndpointError::MissingHost);
                }
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointError::InvalidPort(port.to_string()))?;

                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            #[cfg(unix)]
            "ipc" => {
                if rest.is_empty() {
                    return Err(EndpointError::MissingPath);
                }
                Ok(Endpoint::Ipc(PathBuf::from(rest)))
            }
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            #[cfg(unix)]
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}
