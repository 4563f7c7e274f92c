use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use kamdash_adapters::{info_collection_adapter, post_tbr_adapter, AdapterContext, AirtableTarget, SourceAdapter};
use kamdash_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Default)]
struct ServerState {
    fail_second_page: bool,
    seen: Arc<Mutex<Vec<(String, String, Option<String>)>>>,
}

async fn list_records(
    State(state): State<ServerState>,
    Path((_base, table)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<JsonValue>, StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if auth != "Bearer patTest" {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let offset = query.get("offset").cloned();
    state
        .seen
        .lock()
        .expect("lock")
        .push((table, query.get("view").cloned().unwrap_or_default(), offset.clone()));

    match offset.as_deref() {
        None => Ok(Json(json!({
            "records": [
                {"id": "rec1", "fields": {"candidateName": "One", "Update Pending since": 11}},
                {"id": "rec2", "fields": {"candidateName": "Two", "Update Pending since": 33}}
            ],
            "offset": "cursor2"
        }))),
        Some("cursor2") if state.fail_second_page => Err(StatusCode::INTERNAL_SERVER_ERROR),
        Some("cursor2") => Ok(Json(json!({
            "records": [{"id": "rec3", "fields": {"candidateName": "Three", "Pending Since": 47}}]
        }))),
        Some(_) => Err(StatusCode::BAD_REQUEST),
    }
}

async fn get_record(Path((_base, _table, id)): Path<(String, String, String)>) -> Json<JsonValue> {
    Json(json!({
        "id": id,
        "fields": {"internalWeekdayNotes": "[2024-01-01] fresh"},
        "createdTime": "2024-01-01T00:00:00.000Z"
    }))
}

async fn spawn_server(state: ServerState) -> String {
    let app = Router::new()
        .route("/v0/{base}/{table}", get(list_records))
        .route("/v0/{base}/{table}/{id}", get(get_record))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        rate_limit: None,
        ..Default::default()
    })
    .expect("fetcher")
}

fn target(api_root: &str, table: &str) -> AirtableTarget {
    AirtableTarget {
        api_root: api_root.to_string(),
        base_id: "appTest".into(),
        table: table.into(),
        view: "DNT - KAM Pending (IC)".into(),
        api_key: "patTest".into(),
        page_size: 100,
    }
}

#[tokio::test]
async fn listing_follows_offsets_until_exhausted() {
    let state = ServerState::default();
    let root = spawn_server(state.clone()).await;
    let adapter = info_collection_adapter(target(&root, "Info Collection"));

    let outcome = adapter.fetch_listing(&fetcher(), &AdapterContext::new()).await;
    assert!(!outcome.is_partial(), "{:?}", outcome.error);
    assert_eq!(outcome.pages, 2);
    assert_eq!(
        outcome.records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec!["rec1", "rec2", "rec3"]
    );

    let seen = state.seen.lock().expect("lock").clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "Info Collection");
    assert_eq!(seen[0].1, "DNT - KAM Pending (IC)");
    assert_eq!(seen[1].2.as_deref(), Some("cursor2"));

    let items = adapter.normalize(&outcome.records);
    assert_eq!(items[2].pending_days, 47);
}

#[tokio::test]
async fn failed_page_keeps_partial_records_and_reports_error() {
    let state = ServerState {
        fail_second_page: true,
        ..ServerState::default()
    };
    let root = spawn_server(state).await;
    let adapter = post_tbr_adapter(target(&root, "tblPost"));

    let outcome = adapter.fetch_listing(&fetcher(), &AdapterContext::new()).await;
    assert!(outcome.is_partial());
    assert_eq!(outcome.pages, 1);
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.error.as_deref().unwrap_or_default().contains("500"));
}

#[tokio::test]
async fn bad_credentials_yield_empty_partial_outcome() {
    let root = spawn_server(ServerState::default()).await;
    let mut t = target(&root, "tblPost");
    t.api_key = "wrong".into();
    let outcome = post_tbr_adapter(t).fetch_listing(&fetcher(), &AdapterContext::new()).await;
    assert!(outcome.is_partial());
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn single_record_fetch_returns_current_notes() {
    let root = spawn_server(ServerState::default()).await;
    let adapter = post_tbr_adapter(target(&root, "tblPost"));
    let record = adapter
        .fetch_record(&fetcher(), &AdapterContext::new(), "recXYZ")
        .await
        .expect("record");
    assert_eq!(record.id, "recXYZ");
    assert_eq!(record.notes(), "[2024-01-01] fresh");
}
