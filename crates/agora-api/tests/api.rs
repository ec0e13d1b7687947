//! Loader and upload tests against a mock REST server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use agora_api::{ApiClient, ApiConfig, ApiError, ConversationLoader};
use agora_store::{ChatStoreHandle, InsertOutcome, LoadStatus};
use agora_types::grouping;
use agora_types::models::ConversationKey;
use agora_types::normalize::normalize_message;

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct MockState {
    page_requests: Arc<AtomicUsize>,
    uploads: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    // receives a real-time message while a page request is being served
    live_store: Arc<Mutex<Option<ChatStoreHandle>>>,
}

async fn spawn_server() -> (String, MockState) {
    let state = MockState::default();
    let app = Router::new()
        .route(
            "/api/community-chat/{community_id}/direct-conversation/{other_user_id}",
            get(conversation),
        )
        .route("/api/community-chat/{community_id}/upload", post(upload))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/api"), state)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn direct(id: &str, from: &str, to: &str, at: &str) -> Value {
    json!({
        "_id": id,
        "communityId": "c1",
        "content": format!("message {id}"),
        "senderId": from,
        "senderName": from,
        "chatType": "direct",
        "recipientUserId": to,
        "createdAt": at,
    })
}

async fn conversation(
    State(state): State<MockState>,
    Path((community_id, other_user_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }
    state.page_requests.fetch_add(1, Ordering::SeqCst);
    state.queries.lock().unwrap().push(query.clone());
    assert_eq!(community_id, "c1");
    assert_eq!(other_user_id, "bob");
    let live_store = state.live_store.lock().unwrap().take();
    if let Some(store) = live_store {
        let live = normalize_message(&direct("live", "bob", "alice", "2024-05-02T08:00:00Z")).unwrap();
        store.dispatch(|s| s.insert_message(live));
    }

    let (messages, has_more) = match query.get("before_timestamp") {
        Some(_) => (
            json!([{ "date": "2024-04-30", "messages": [
                direct("m0", "bob", "alice", "2024-04-30T09:00:00Z"),
            ]}]),
            false,
        ),
        None => (
            json!([{ "date": "2024-05-01", "messages": [
                direct("m1", "bob", "alice", "2024-05-01T12:00:00Z"),
                direct("m2", "alice", "bob", "2024-05-01T12:05:00Z"),
            ]}]),
            true,
        ),
    };

    Json(json!({
        "success": true,
        "data": {
            "messages": messages,
            "otherUser": { "_id": "bob", "fullName": "Bob Builder", "isOnline": true },
            "pagination": { "page": 1, "limit": 50, "total": 3, "hasMore": has_more },
        }
    }))
    .into_response()
}

async fn upload(
    State(state): State<MockState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.uploads.fetch_add(1, Ordering::SeqCst);

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mime = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        return Json(json!({
            "success": true,
            "data": {
                "fileUrl": format!("https://files.example.org/{name}"),
                "fileName": name,
                "fileType": mime,
                "size": bytes.len(),
            }
        }))
        .into_response();
    }
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "error": "No file" }))).into_response()
}

fn store() -> ChatStoreHandle {
    let store = ChatStoreHandle::default();
    store.dispatch(|s| {
        s.set_current_user(Some("alice".to_string()));
        s.set_active_community("c1");
    });
    store
}

fn api(url: &str, token: &str) -> ApiClient {
    ApiClient::new(ApiConfig::new(url), token).unwrap()
}

fn bob_key() -> ConversationKey {
    ConversationKey::direct("c1", "bob")
}

#[tokio::test]
async fn open_fetches_first_page() {
    let (url, state) = spawn_server().await;
    let store = store();
    let loader = ConversationLoader::new(api(&url, TOKEN), store.clone());

    let page = loader.open_direct_conversation("bob").await.unwrap().unwrap();

    assert_eq!(page.added, 2);
    assert!(page.pagination.has_more);
    assert_eq!(state.page_requests.load(Ordering::SeqCst), 1);
    assert_eq!(state.queries.lock().unwrap()[0].get("page").map(String::as_str), Some("1"));
    store.read(|s| {
        assert_eq!(grouping::message_count(s.direct_messages("bob")), 2);
        assert_eq!(s.load_status(&bob_key()), LoadStatus::Loaded);
        assert_eq!(s.active_direct_chat_user_id(), Some("bob"));
        let bob = &s.direct_chat_users()[0];
        assert_eq!(bob.name, "Bob Builder");
        // opening the conversation reads bob's message
        assert!(s.find_message("m1").unwrap().read_by.contains("alice"));
    });
}

#[tokio::test]
async fn open_serves_cached_conversation() {
    let (url, state) = spawn_server().await;
    let store = store();
    let live = normalize_message(&direct("live", "bob", "alice", "2024-05-02T08:00:00Z")).unwrap();
    assert_eq!(store.dispatch(|s| s.insert_message(live)), InsertOutcome::Inserted);
    let loader = ConversationLoader::new(api(&url, TOKEN), store.clone());

    assert_eq!(loader.open_direct_conversation("bob").await.unwrap(), None);

    assert_eq!(state.page_requests.load(Ordering::SeqCst), 0);
    store.read(|s| assert_eq!(grouping::message_count(s.direct_messages("bob")), 1));
}

#[tokio::test]
async fn page_overtaken_by_live_message_adds_nothing() {
    let (url, state) = spawn_server().await;
    let store = store();
    *state.live_store.lock().unwrap() = Some(store.clone());
    let loader = ConversationLoader::new(api(&url, TOKEN), store.clone());

    let page = loader.open_direct_conversation("bob").await.unwrap().unwrap();

    assert_eq!(page.added, 0);
    assert_eq!(state.page_requests.load(Ordering::SeqCst), 1);
    store.read(|s| {
        let messages = grouping::flatten(s.direct_messages("bob"));
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["live"]);
        assert_eq!(s.load_status(&bob_key()), LoadStatus::Loaded);
    });
}

#[tokio::test]
async fn older_page_is_requested_before_oldest_message() {
    let (url, state) = spawn_server().await;
    let store = store();
    let loader = ConversationLoader::new(api(&url, TOKEN), store.clone());
    loader.open_direct_conversation("bob").await.unwrap();

    let page = loader.load_older("bob").await.unwrap();

    assert_eq!(page.added, 1);
    assert!(!page.pagination.has_more);
    let queries = state.queries.lock().unwrap();
    assert_eq!(
        queries[1].get("before_timestamp").map(String::as_str),
        Some("2024-05-01T12:00:00.000Z")
    );
    drop(queries);
    store.read(|s| {
        let messages = grouping::flatten(s.direct_messages("bob"));
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1", "m2"]);
    });
}

#[tokio::test]
async fn refresh_only_adds_missing_messages() {
    let (url, _state) = spawn_server().await;
    let store = store();
    let loader = ConversationLoader::new(api(&url, TOKEN), store.clone());
    loader.open_direct_conversation("bob").await.unwrap();

    let page = loader.refresh("bob").await.unwrap();

    assert_eq!(page.added, 0);
    store.read(|s| {
        assert_eq!(grouping::message_count(s.direct_messages("bob")), 2);
        assert_eq!(s.load_status(&bob_key()), LoadStatus::Loaded);
    });
}

#[tokio::test]
async fn bad_token_is_unauthorized() {
    let (url, _state) = spawn_server().await;
    let store = store();
    let loader = ConversationLoader::new(api(&url, "wrong"), store.clone());

    let result = loader.open_direct_conversation("bob").await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    store.read(|s| assert_eq!(s.load_status(&bob_key()), LoadStatus::Idle));
}

#[tokio::test]
async fn upload_streams_file_with_progress() {
    let (url, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, vec![b'x'; 64 * 1024]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let file = api(&url, TOKEN)
        .upload_file("c1", &path, move |p| sink.lock().unwrap().push(p))
        .await
        .unwrap();

    assert_eq!(file.url, "https://files.example.org/notes.txt");
    assert_eq!(file.name, "notes.txt");
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(state.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap().last(), Some(&100));
}

#[tokio::test]
async fn upload_progress_is_cleared_from_store() {
    let (url, _state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    std::fs::write(&path, [0u8; 128]).unwrap();
    let store = store();

    let file = api(&url, TOKEN)
        .upload_attachment(&store, "c1", &path)
        .await
        .unwrap();

    assert_eq!(file.mime_type, "image/png");
    store.read(|s| assert_eq!(s.upload_progress(), None));
}

#[tokio::test]
async fn oversized_file_is_refused_locally() {
    let (url, state) = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, [0u8; 20]).unwrap();

    let mut config = ApiConfig::new(&url);
    config.max_upload_bytes = 10;
    let client = ApiClient::new(config, TOKEN).unwrap();

    let result = client.upload_file("c1", &path, |_| {}).await;

    assert!(matches!(
        result,
        Err(ApiError::FileTooLarge { size: 20, limit: 10 })
    ));
    assert_eq!(state.uploads.load(Ordering::SeqCst), 0);
}
