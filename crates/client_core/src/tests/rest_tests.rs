use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::protocol::FeedEvent;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;
use crate::config::{ClientConfig, KeyKind};

#[derive(Default)]
struct Recorded {
    headers: Vec<HeaderMap>,
    find_query: HashMap<String, String>,
    created: Vec<Value>,
    uploads: Vec<(String, Option<String>, Vec<u8>)>,
    live_frames: Vec<Value>,
    close_received: bool,
}

#[derive(Clone, Default)]
struct MockState {
    recorded: Arc<Mutex<Recorded>>,
}

async fn find_items(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut recorded = state.recorded.lock().await;
    recorded.headers.push(headers);
    recorded.find_query = query;
    Json(json!({
        "results": [
            {"objectId": "A", "nome": "a", "createdAt": "2024-01-01T00:00:00.000Z"},
            {"objectId": "B", "nome": "b", "file": {"__type": "File", "name": "b.png", "url": "http://files/b.png"}},
            {"objectId": "C", "nome": "c"}
        ]
    }))
}

async fn create_item(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.recorded.lock().await.created.push(body);
    (
        StatusCode::CREATED,
        Json(json!({"objectId": "new-1", "createdAt": "2024-02-02T10:00:00.000Z"})),
    )
}

async fn destroy_item(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    if id == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"code": 101, "error": "Object not found."})),
        );
    }
    (StatusCode::OK, Json(json!({})))
}

async fn upload_file(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state
        .recorded
        .lock()
        .await
        .uploads
        .push((name.clone(), content_type, body.to_vec()));
    (
        StatusCode::CREATED,
        Json(json!({"name": format!("tfss-{name}"), "url": format!("http://files/tfss-{name}")})),
    )
}

async fn live_query(ws: WebSocketUpgrade, State(state): State<MockState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| live_query_session(state, socket))
}

async fn live_query_session(state: MockState, mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                state.recorded.lock().await.close_received = true;
                break;
            }
            _ => continue,
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        state.recorded.lock().await.live_frames.push(frame.clone());
        match frame["op"].as_str() {
            Some("connect") if frame["applicationId"] == "wrong" => {
                let reply = json!({
                    "op": "error",
                    "code": 4,
                    "error": "Invalid application id",
                    "reconnect": false
                });
                let _ = socket.send(WsMessage::Text(reply.to_string())).await;
            }
            Some("connect") => {
                let reply = json!({"op": "connected", "clientId": 1});
                let _ = socket.send(WsMessage::Text(reply.to_string())).await;
            }
            Some("subscribe") => {
                let request_id = frame["requestId"].as_u64().unwrap_or_default();
                let frames = [
                    json!({"op": "subscribed", "clientId": 1, "requestId": request_id}),
                    json!({"op": "create", "clientId": 1, "requestId": request_id + 100,
                           "object": {"objectId": "other", "nome": "other"}}),
                    json!({"op": "create", "clientId": 1, "requestId": request_id,
                           "object": {"className": "Item", "objectId": "D", "nome": "d"}}),
                    json!({"op": "delete", "clientId": 1, "requestId": request_id,
                           "object": {"className": "Item", "objectId": "A", "nome": "a"}}),
                ];
                for reply in frames {
                    let _ = socket.send(WsMessage::Text(reply.to_string())).await;
                }
            }
            _ => {}
        }
    }
}

async fn spawn_store_server() -> Result<(String, MockState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MockState::default();
    let app = Router::new()
        .route("/parse", get(live_query))
        .route("/parse/classes/Item", get(find_items).post(create_item))
        .route("/parse/classes/Item/:id", delete(destroy_item))
        .route("/parse/files/:name", post(upload_file))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/parse"), state))
}

fn store_for(endpoint_url: &str, app_id: &str) -> ParseStore {
    let config = ClientConfig {
        endpoint_url: endpoint_url.to_string(),
        app_id: app_id.to_string(),
        access_key: "123456".to_string(),
        key_kind: KeyKind::Master,
        ..ClientConfig::default()
    }
    .validate()
    .expect("valid config");
    ParseStore::new(
        config,
        SessionState {
            installation_id: "inst-test".to_string(),
        },
    )
}

#[tokio::test]
async fn find_all_sends_store_headers_and_keeps_order() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");

    let items = store.find_all().await.expect("find");

    let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);
    assert_eq!(items[1].file_url(), Some("http://files/b.png"));

    let recorded = state.recorded.lock().await;
    let headers = &recorded.headers[0];
    assert_eq!(headers["x-parse-application-id"], "testItems");
    assert_eq!(headers["x-parse-master-key"], "123456");
    assert_eq!(headers["x-parse-installation-id"], "inst-test");
    assert_eq!(recorded.find_query.get("limit").map(String::as_str), Some("100"));
    assert_eq!(
        recorded.find_query.get("order").map(String::as_str),
        Some("createdAt")
    );
}

#[tokio::test]
async fn save_item_posts_store_columns_and_returns_assigned_id() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");

    let item = store
        .save_item(NewItem {
            name: "apple".into(),
            file: Some(FileRef::new("tfss-apple.png", Some("http://files/a.png".into()))),
        })
        .await
        .expect("save");

    assert_eq!(item.id, ItemId::new("new-1"));
    assert_eq!(item.name, "apple");
    assert!(item.created_at.is_some());
    let created = &state.recorded.lock().await.created[0];
    assert_eq!(created["nome"], "apple");
    assert_eq!(created["file"]["__type"], "File");
    assert_eq!(created["file"]["name"], "tfss-apple.png");
}

#[tokio::test]
async fn destroy_maps_remote_error_body() {
    let (endpoint, _state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");

    store
        .destroy_item(&ItemId::new("A"))
        .await
        .expect("destroy existing");
    let err = store
        .destroy_item(&ItemId::new("missing"))
        .await
        .expect_err("must fail");

    match err {
        StoreError::Api(remote) => assert!(remote.is_not_found()),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn upload_file_posts_raw_bytes_with_content_type() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");
    let attachment = FileAttachment::from_bytes("photo.png", b"\x89PNG-bytes");

    let file = store.upload_file(&attachment).await.expect("upload");

    assert_eq!(file.name, "tfss-photo.png");
    assert_eq!(file.url.as_deref(), Some("http://files/tfss-photo.png"));
    let recorded = state.recorded.lock().await;
    let (name, content_type, body) = &recorded.uploads[0];
    assert_eq!(name, "photo.png");
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(body.as_slice(), b"\x89PNG-bytes");
}

#[tokio::test]
async fn subscribe_streams_events_for_own_request_only() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");

    let mut subscription = store.subscribe().await.expect("subscribe");

    let first = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("event in time")
        .expect("feed open")
        .expect("event");
    assert_eq!(first, FeedEvent::Create(Item::new("D", "d")));

    let second = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("event in time")
        .expect("feed open")
        .expect("event");
    assert!(matches!(second, FeedEvent::Delete(ref item) if item.id.as_str() == "A"));

    let frames = state.recorded.lock().await.live_frames.clone();
    assert_eq!(frames[0]["op"], "connect");
    assert_eq!(frames[0]["masterKey"], "123456");
    assert_eq!(frames[0]["installationId"], "inst-test");
    assert_eq!(frames[1]["query"]["className"], "Item");

    subscription.cancel();
    assert!(subscription.is_cancelled());
}

#[tokio::test]
async fn cancel_unsubscribes_before_closing_socket() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");
    let mut subscription = store.subscribe().await.expect("subscribe");

    subscription.cancel();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.recorded.lock().await.close_received {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("close frame in time");
    let frames = state.recorded.lock().await.live_frames.clone();
    let last = frames.last().expect("frames");
    assert_eq!(last["op"], "unsubscribe");
    assert_eq!(last["requestId"], frames[1]["requestId"]);
}

#[tokio::test]
async fn dropping_subscription_releases_it_on_the_server() {
    let (endpoint, state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "testItems");
    drop(store.subscribe().await.expect("subscribe"));

    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.recorded.lock().await.close_received {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("close frame in time");
    let recorded = state.recorded.lock().await;
    assert!(recorded
        .live_frames
        .iter()
        .any(|frame| frame["op"] == "unsubscribe"));
}

#[tokio::test]
async fn rejected_live_query_connect_is_an_error() {
    let (endpoint, _state) = spawn_store_server().await.expect("spawn server");
    let store = store_for(&endpoint, "wrong");

    let err = store.subscribe().await.err().expect("must fail");

    assert!(
        err.to_string().contains("Invalid application id"),
        "unexpected error: {err}"
    );
}

#[test]
fn route_frame_reports_server_errors_and_skips_control_frames() {
    let error = live_query::route_frame(
        r#"{"op":"error","code":1,"error":"boom","reconnect":true}"#,
        1,
    );
    assert!(matches!(error, Some(Err(StoreError::LiveQuery(_)))));

    assert!(live_query::route_frame(r#"{"op":"subscribed","requestId":1}"#, 1).is_none());
    assert!(live_query::route_frame(r#"{"op":"pong"}"#, 1).is_none());
    assert!(matches!(
        live_query::route_frame("not json", 1),
        Some(Err(StoreError::LiveQuery(_)))
    ));
}
