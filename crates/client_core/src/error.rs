//! Error taxonomy for the item list client.

use std::path::PathBuf;

use shared::error::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to remote store failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Api(#[from] RemoteError),
    #[error("unexpected response from remote store: {0}")]
    Decode(String),
    #[error("live query failed: {0}")]
    LiveQuery(String),
    #[error("session cache failed: {0}")]
    Session(String),
    #[error("there was an error reading the file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid attachment payload: {0}")]
    Attachment(String),
    #[error("item list was disposed")]
    Disposed,
}

impl From<tokio_tungstenite::tungstenite::Error> for StoreError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::LiveQuery(value.to_string())
    }
}

/// Which user-visible operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Initial bulk fetch.
    Fetch,
    /// Add or delete mirrored to the remote store.
    Mutation,
    /// Reading a local file for attachment.
    FileRead,
    /// Live feed connection or decoding.
    Feed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Mutation => "mutation",
            Self::FileRead => "file_read",
            Self::Feed => "feed",
        }
    }
}
