//! Error types. Transport failures are carried as values inside command
//! results; configuration failures are the only errors returned as `Err`
//! from construction paths.

use crate::device_control::TransportState;

/// Why a single network operation against a device did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("timed out connecting")]
    ConnectTimeout,
    #[error("timed out waiting for a response")]
    ReadTimeout,
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("device returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
    #[error("device closed the connection without acknowledging")]
    NoAcknowledgement,
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("invalid command token: {0:?}")]
    InvalidCommand(String),
    #[error("no command transport available (state: {0})")]
    NotConnected(TransportState),
    #[error("remote library error: {0}")]
    Library(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl TransportError {
    /// Connect and read timeouts are both reported as a timeout to callers
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::ReadTimeout)
    }

    /// Classify an I/O error raised while connecting to a device
    pub fn from_connect_error(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::TimedOut => Self::ConnectTimeout,
            ErrorKind::NotFound
            | ErrorKind::AddrNotAvailable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable => Self::Unreachable(err.to_string()),
            // Resolver failures surface as uncategorized errors
            _ if err.to_string().contains("lookup") => Self::Unreachable(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }

    /// Classify a reqwest error raised by a status query
    pub fn from_http_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::ReadTimeout
        } else if err.is_connect() {
            let text = err.to_string();
            if text.to_lowercase().contains("refused") {
                Self::ConnectionRefused
            } else {
                Self::Unreachable(text)
            }
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Configuration could not be loaded, validated or persisted
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("device already configured: {0}")]
    DuplicateDevice(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("invalid host input {0:?}")]
    InvalidHostInput(String),
}
