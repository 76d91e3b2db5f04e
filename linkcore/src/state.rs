use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the single connection owned by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// States from which a fresh connect attempt may start.
    ///
    /// `Disconnecting` is included: the pending close is always processed
    /// before the next open on the I/O path.
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Failed | Self::Disconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEndpoint")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Validates a host/port pair. Ports outside `1..=65535` and blank hosts
    /// are rejected.
    pub fn new(host: impl Into<String>, port: u32) -> Result<Self> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidEndpoint("host is empty".into()));
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                ClientError::InvalidEndpoint(format!("port {port} is outside 1..=65535"))
            })?;
        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Deserialize)]
struct RawEndpoint {
    host: String,
    port: u32,
}

impl TryFrom<RawEndpoint> for Endpoint {
    type Error = ClientError;

    fn try_from(raw: RawEndpoint) -> Result<Self> {
        Endpoint::new(raw.host, raw.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
