use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Item, ItemId};

// REST bodies.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindResponse<T> {
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    #[serde(rename = "objectId")]
    pub object_id: ItemId,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    pub name: String,
    pub url: String,
}

// Live query websocket frames.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuery {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "where", default)]
    pub filter: serde_json::Map<String, serde_json::Value>,
}

impl LiveQuery {
    /// Query matching every record of `class_name`.
    pub fn all(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            filter: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect {
        #[serde(rename = "applicationId")]
        application_id: String,
        #[serde(rename = "masterKey", skip_serializing_if = "Option::is_none")]
        master_key: Option<String>,
        #[serde(rename = "restAPIKey", skip_serializing_if = "Option::is_none")]
        rest_api_key: Option<String>,
        #[serde(rename = "javascriptKey", skip_serializing_if = "Option::is_none")]
        javascript_key: Option<String>,
        #[serde(rename = "installationId")]
        installation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe { request_id: u64, query: LiveQuery },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { request_id: u64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Connected {
        #[serde(default)]
        client_id: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Subscribed { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Create { request_id: u64, object: Item },
    #[serde(rename_all = "camelCase")]
    Update {
        request_id: u64,
        object: Item,
        #[serde(default)]
        original: Option<Item>,
    },
    #[serde(rename_all = "camelCase")]
    Delete { request_id: u64, object: Item },
    #[serde(rename_all = "camelCase")]
    Enter { request_id: u64, object: Item },
    #[serde(rename_all = "camelCase")]
    Leave { request_id: u64, object: Item },
    Error {
        #[serde(default)]
        code: i64,
        #[serde(default)]
        error: String,
        #[serde(default)]
        reconnect: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Splits a data frame into its subscription id and feed event.
    /// Control frames yield `None`.
    pub fn into_feed_event(self) -> Option<(u64, FeedEvent)> {
        match self {
            Self::Create { request_id, object } => Some((request_id, FeedEvent::Create(object))),
            Self::Update {
                request_id, object, ..
            } => Some((request_id, FeedEvent::Update(object))),
            Self::Delete { request_id, object } => Some((request_id, FeedEvent::Delete(object))),
            Self::Enter { request_id, object } => Some((request_id, FeedEvent::Enter(object))),
            Self::Leave { request_id, object } => Some((request_id, FeedEvent::Leave(object))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEventKind {
    Create,
    Update,
    Delete,
    Enter,
    Leave,
}

impl FeedEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Enter => "enter",
            Self::Leave => "leave",
        }
    }
}

/// Change notification for a record matched by a live query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Create(Item),
    Update(Item),
    Delete(Item),
    /// Record started matching the query after an update.
    Enter(Item),
    /// Record stopped matching the query after an update.
    Leave(Item),
}

impl FeedEvent {
    pub fn kind(&self) -> FeedEventKind {
        match self {
            Self::Create(_) => FeedEventKind::Create,
            Self::Update(_) => FeedEventKind::Update,
            Self::Delete(_) => FeedEventKind::Delete,
            Self::Enter(_) => FeedEventKind::Enter,
            Self::Leave(_) => FeedEventKind::Leave,
        }
    }

    pub fn item(&self) -> &Item {
        match self {
            Self::Create(item)
            | Self::Update(item)
            | Self::Delete(item)
            | Self::Enter(item)
            | Self::Leave(item) => item,
        }
    }
}
