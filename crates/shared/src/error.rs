use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes the remote store reports that the client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    ObjectNotFound,
    Other(i64),
}

impl From<i64> for RemoteErrorCode {
    fn from(value: i64) -> Self {
        match value {
            101 => Self::ObjectNotFound,
            other => Self::Other(other),
        }
    }
}

/// Error body returned by the remote store, e.g. `{"code":101,"error":"Object not found."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("remote error {code}: {error}")]
pub struct RemoteError {
    pub code: i64,
    pub error: String,
}

impl RemoteError {
    pub fn new(code: i64, error: impl Into<String>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> RemoteErrorCode {
        RemoteErrorCode::from(self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == RemoteErrorCode::ObjectNotFound
    }
}
