use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{FileRef, Item, ItemId, NewItem},
    error::RemoteError,
    protocol::{CreatedResponse, FileUploadResponse, FindResponse},
};
use tracing::debug;

use crate::{
    attachment::FileAttachment,
    config::ValidatedConfig,
    error::StoreError,
    live_query,
    session::{SessionCache, SessionState},
    store::{LiveSubscription, RemoteStore},
};

const APPLICATION_ID_HEADER: &str = "X-Parse-Application-Id";
const INSTALLATION_ID_HEADER: &str = "X-Parse-Installation-Id";

/// Remote store client speaking the Parse REST and live query protocols.
pub struct ParseStore {
    http: Client,
    config: ValidatedConfig,
    installation_id: String,
    next_request_id: AtomicU64,
}

impl ParseStore {
    pub fn new(config: ValidatedConfig, session: SessionState) -> Self {
        Self {
            http: Client::new(),
            config,
            installation_id: session.installation_id,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Builds a client whose installation id comes from the session cache.
    pub async fn connect(config: ValidatedConfig) -> Result<Self, StoreError> {
        let cache = SessionCache::resolve(config.state_dir.as_deref())?;
        let session = cache.load_or_create().await?;
        debug!(path = %cache.path().display(), "session cache ready");
        Ok(Self::new(config, session))
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    fn class_url(&self) -> String {
        format!(
            "{}/classes/{}",
            self.config.endpoint_url, self.config.class_name
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(APPLICATION_ID_HEADER, self.config.app_id.as_str())
            .header(
                self.config.key_kind.header_name(),
                self.config.access_key.as_str(),
            )
            .header(INSTALLATION_ID_HEADER, self.installation_id.as_str())
    }
}

#[async_trait]
impl RemoteStore for ParseStore {
    async fn find_all(&self) -> Result<Vec<Item>, StoreError> {
        let response = self
            .authorized(self.http.get(self.class_url()))
            .query(&[
                ("limit", self.config.fetch_limit.to_string()),
                ("order", "createdAt".to_string()),
            ])
            .send()
            .await?;
        let body: FindResponse<Item> = read_json(response).await?;
        Ok(body.results)
    }

    async fn save_item(&self, item: NewItem) -> Result<Item, StoreError> {
        let response = self
            .authorized(self.http.post(self.class_url()))
            .json(&item)
            .send()
            .await?;
        let created: CreatedResponse = read_json(response).await?;
        Ok(Item {
            id: created.object_id,
            name: item.name,
            file: item.file,
            created_at: created.created_at,
            updated_at: created.created_at,
        })
    }

    async fn destroy_item(&self, id: &ItemId) -> Result<(), StoreError> {
        let response = self
            .authorized(
                self.http
                    .delete(format!("{}/{}", self.class_url(), id.as_str())),
            )
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn upload_file(&self, file: &FileAttachment) -> Result<FileRef, StoreError> {
        let bytes = file.decode()?;
        let size_bytes = bytes.len();
        let response = self
            .authorized(
                self.http
                    .post(format!("{}/files/{}", self.config.endpoint_url, file.name)),
            )
            .header(CONTENT_TYPE, file.content_type.as_str())
            .body(bytes)
            .send()
            .await?;
        let uploaded: FileUploadResponse = read_json(response).await?;
        debug!(name = %uploaded.name, size_bytes, "uploaded file");
        Ok(FileRef::new(uploaded.name, Some(uploaded.url)))
    }

    async fn subscribe(&self) -> Result<LiveSubscription, StoreError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        live_query::open_subscription(&self.config, &self.installation_id, request_id).await
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<RemoteError>(&body) {
        Ok(remote) => Err(StoreError::Api(remote)),
        Err(_) => Err(StoreError::Decode(format!("status {status}: {body}"))),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode(err.to_string()))
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
