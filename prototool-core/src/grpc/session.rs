//! # Call Session
//!
//! One HTTP/2 connection to a target endpoint plus the options it was
//! negotiated with. A session lives for a single invocation and is torn down
//! when dropped.
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid address '{address}': '{source}'")]
    InvalidAddress {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("Failed to connect to '{address}': '{source}'")]
    Connect {
        address: String,
        source: tonic::transport::Error,
    },
    #[error("Timed out connecting to '{address}' after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Bounds connection establishment only.
    pub connect_timeout: Duration,
    /// HTTP/2 keepalive ping interval, also sent while idle.
    pub keepalive: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive: None,
        }
    }
}

/// An established connection.
#[derive(Debug, Clone)]
pub struct CallSession {
    address: String,
    channel: Channel,
}

impl CallSession {
    /// Connects to `address` (`host:port` or a full `http://` URI).
    pub async fn connect(address: &str, options: &SessionOptions) -> Result<Self, SessionError> {
        let uri = normalize_address(address);

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|source| SessionError::InvalidAddress {
                address: address.to_string(),
                source,
            })?
            .connect_timeout(options.connect_timeout);

        if let Some(interval) = options.keepalive {
            endpoint = endpoint
                .http2_keep_alive_interval(interval)
                .keep_alive_while_idle(true);
        }

        debug!(%uri, connect_timeout = ?options.connect_timeout, keepalive = ?options.keepalive, "connecting");

        let channel = tokio::time::timeout(options.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                address: address.to_string(),
                timeout: options.connect_timeout,
            })?
            .map_err(|source| SessionError::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self { address: uri, channel })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

/// Prepends `http://` when the address carries no scheme.
fn normalize_address(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}
