//! Error types for Netsock

use thiserror::Error;

/// Main error type for Netsock
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid handler: a connection handler is required")]
    InvalidHandler,

    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("Invalid unix group id {0}: must be within [0, {max}]", max = crate::common::MAX_GID)]
    InvalidGroup(i32),

    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection is not established")]
    Connection,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handler panicked: {0}")]
    Handler(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown timeout: connections still open")]
    ShutdownTimeout,
}

impl Error {
    /// Configuration errors are detected before any socket is touched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidAddress(_)
                | Error::InvalidHandler
                | Error::InvalidProtocol(_)
                | Error::InvalidGroup(_)
                | Error::InvalidTls(_)
        )
    }

    /// The error a closed listener or socket produces while shutting down.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Result type alias for Netsock
pub type Result<T> = std::result::Result<T, Error>;
