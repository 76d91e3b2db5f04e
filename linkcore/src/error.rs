use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("DNS lookup failed for {host}: {reason}")]
    DnsFailure { host: String, reason: String },
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection attempt timed out")]
    Timeout,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("write after close")]
    WriteAfterClose,
    #[error("frame is too large (max: {max}, got: {got})")]
    FrameTooLarge { max: usize, got: usize },
    #[error("response is not valid UTF-8: {0}")]
    DecodeError(#[from] std::string::FromUtf8Error),
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),
    #[error("the I/O task has stopped")]
    IoTaskStopped,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Maps a socket error from a connect attempt onto the lifecycle kinds.
    pub fn from_connect_error(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::TimedOut => Self::Timeout,
            ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
                Self::NetworkUnreachable
            }
            _ => Self::Io(err),
        }
    }

    /// Errors raised synchronously by the public API rather than through the
    /// connection callback.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEndpoint(_)
                | Self::AlreadyConnecting
                | Self::AlreadyConnected
                | Self::NotConnected
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("file name is {0} bytes, at most 255 fit in the header")]
    FileNameTooLong(usize),
    #[error("file name is not valid UTF-8")]
    InvalidFileName,
    #[error("unknown data type 0x{0:02x}")]
    UnknownDataType(u8),
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("payload of {0} bytes does not fit a u32 size field")]
    PayloadTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ClientError>;
