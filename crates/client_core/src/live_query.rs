//! Websocket client for the store's live query server.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::protocol::{ClientMessage, LiveQuery, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};

use crate::{
    config::{KeyKind, ValidatedConfig},
    error::StoreError,
    store::{FeedMessage, LiveSubscription, FEED_CHANNEL_CAPACITY},
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn connect_message(config: &ValidatedConfig, installation_id: &str) -> ClientMessage {
    let key = Some(config.access_key.clone());
    let (master_key, rest_api_key, javascript_key) = match config.key_kind {
        KeyKind::Master => (key, None, None),
        KeyKind::RestApi => (None, key, None),
        KeyKind::Javascript => (None, None, key),
    };
    ClientMessage::Connect {
        application_id: config.app_id.clone(),
        master_key,
        rest_api_key,
        javascript_key,
        installation_id: installation_id.to_string(),
    }
}

fn encode(message: &ClientMessage) -> Result<Message, StoreError> {
    serde_json::to_string(message)
        .map(Message::Text)
        .map_err(|err| StoreError::LiveQuery(format!("failed to encode frame: {err}")))
}

/// Connects, subscribes to every record of the configured class and spawns
/// the task that forwards change events to the returned handle.
pub async fn open_subscription(
    config: &ValidatedConfig,
    installation_id: &str,
    request_id: u64,
) -> Result<LiveSubscription, StoreError> {
    let ws_url = config.live_query_url.clone();
    let (ws_stream, _) = connect_async(ws_url.as_str())
        .await
        .map_err(|err| {
            StoreError::LiveQuery(format!("failed to connect websocket {ws_url}: {err}"))
        })?;
    let (mut writer, mut reader) = ws_stream.split();

    writer
        .send(encode(&connect_message(config, installation_id))?)
        .await?;
    writer
        .send(encode(&ClientMessage::Subscribe {
            request_id,
            query: LiveQuery::all(config.class_name.clone()),
        })?)
        .await?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, await_subscribed(&mut reader, request_id))
        .await
        .map_err(|_| StoreError::LiveQuery("timed out waiting for subscription".to_string()))??;
    info!(%ws_url, class = %config.class_name, request_id, "live query: subscribed");

    let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let (shutdown_tx, mut shutdown) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = &mut shutdown => break,
                frame = reader.next() => frame,
            };
            let outgoing = match frame {
                Some(Ok(Message::Text(text))) => match route_frame(&text, request_id) {
                    Some(message) => message,
                    None => continue,
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    let _ = tx
                        .send(Err(StoreError::LiveQuery(format!(
                            "websocket receive failed: {err}"
                        ))))
                        .await;
                    break;
                }
            };
            if tx.send(outgoing).await.is_err() {
                break;
            }
        }
        release(&mut writer, request_id).await;
        info!(request_id, "live query: feed ended");
    });

    Ok(LiveSubscription::new(rx, task, shutdown_tx))
}

/// Unsubscribes and closes the socket, bounded by [`RELEASE_TIMEOUT`].
async fn release<W>(writer: &mut W, request_id: u64)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let farewell = async {
        writer
            .send(encode(&ClientMessage::Unsubscribe { request_id })?)
            .await?;
        writer.send(Message::Close(None)).await?;
        Ok::<(), StoreError>(())
    };
    match tokio::time::timeout(RELEASE_TIMEOUT, farewell).await {
        Ok(Ok(())) => debug!(request_id, "live query: unsubscribed"),
        Ok(Err(err)) => debug!(request_id, %err, "live query: release not sent"),
        Err(_) => debug!(request_id, "live query: release timed out"),
    }
}

async fn await_subscribed<S>(reader: &mut S, request_id: u64) -> Result<(), StoreError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = reader.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match decode_frame(&text)? {
            ServerMessage::Connected { .. } => debug!("live query: connected"),
            ServerMessage::Subscribed { request_id: id } if id == request_id => return Ok(()),
            ServerMessage::Error { code, error, .. } => {
                return Err(StoreError::LiveQuery(format!(
                    "server rejected subscription ({code}): {error}"
                )));
            }
            other => debug!(?other, "live query: ignoring frame before subscribed"),
        }
    }
    Err(StoreError::LiveQuery(
        "connection closed before subscription was confirmed".to_string(),
    ))
}

fn decode_frame(text: &str) -> Result<ServerMessage, StoreError> {
    serde_json::from_str(text)
        .map_err(|err| StoreError::LiveQuery(format!("invalid live query frame: {err}")))
}

/// Maps a text frame to what the subscriber should see, if anything.
pub(crate) fn route_frame(text: &str, request_id: u64) -> Option<FeedMessage> {
    let message = match decode_frame(text) {
        Ok(message) => message,
        Err(err) => return Some(Err(err)),
    };
    match message {
        ServerMessage::Error {
            code,
            error,
            reconnect,
        } => Some(Err(StoreError::LiveQuery(format!(
            "server error {code}: {error} (reconnect={reconnect})"
        )))),
        ServerMessage::Unknown => {
            warn!("live query: ignoring unknown op");
            None
        }
        other => match other.into_feed_event() {
            Some((id, event)) if id == request_id => Some(Ok(event)),
            Some((id, _)) => {
                debug!(id, request_id, "live query: event for another subscription");
                None
            }
            None => None,
        },
    }
}
