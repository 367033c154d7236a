//! Client for a live-updating item list backed by a Parse-compatible store.

pub mod attachment;
pub mod config;
pub mod controller;
pub mod error;
pub mod live_query;
pub mod reconciler;
pub mod rest;
pub mod session;
pub mod store;

pub use attachment::FileAttachment;
pub use config::{load_config, ClientConfig, KeyKind, ValidatedConfig};
pub use controller::{ControllerEvent, ItemListController, PendingInput};
pub use error::{ConfigError, ErrorKind, StoreError};
pub use reconciler::{ItemList, ListChange};
pub use rest::ParseStore;
pub use session::{SessionCache, SessionState};
pub use store::{FeedMessage, LiveSubscription, RemoteStore};
