//! Error types.
//!
//! Value-update failures never travel up the call stack: they are handed to
//! the observer as an [`UpdateError`] next to a sentinel value. [`HrmError`]
//! covers the layers around the client (configuration and backends).

use std::path::PathBuf;

use thiserror::Error;

/// Opaque error passed through from the Bluetooth backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A characteristic payload that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// What the observer is told when a value update fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// A command the client refuses without telling anyone but the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMisuse {
    #[error("connect requested with an empty monitor name")]
    EmptyName,

    #[error("no discovered monitor named {0:?}")]
    UnknownMonitor(String),
}

#[derive(Error, Debug)]
pub enum HrmError {
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("no Bluetooth adapter found")]
    NoAdapter,
}

impl HrmError {
    pub fn error_code(&self) -> &'static str {
        match self {
            HrmError::ConfigIo { .. } => "CONFIG_IO",
            HrmError::ConfigParse(_) => "CONFIG_PARSE",
            HrmError::NoAdapter => "NO_ADAPTER",
        }
    }
}

pub type Result<T> = std::result::Result<T, HrmError>;
