use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::StoreError;

const DEFAULT_FILENAME: &str = "attachment.bin";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// File picked by the user but not yet uploaded, held as base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub content_type: String,
    pub data_b64: String,
}

impl FileAttachment {
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = sanitize_filename(&name.into());
        let content_type = mime_guess::from_path(&name)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        Self {
            name,
            content_type,
            data_b64: STANDARD.encode(bytes),
        }
    }

    pub async fn read_from_path(path: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StoreError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(DEFAULT_FILENAME);
        Ok(Self::from_bytes(filename, &bytes))
    }

    /// `data:` URL usable as an inline preview before upload.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.data_b64)
    }

    pub fn decode(&self) -> Result<Vec<u8>, StoreError> {
        STANDARD
            .decode(&self.data_b64)
            .map_err(|err| StoreError::Attachment(format!("invalid base64 payload: {err}")))
    }
}

/// The store puts the filename in the upload path; keep it to one safe segment.
fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned
    }
}
