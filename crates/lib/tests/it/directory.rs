//! GoogleDirectory against a local mock of the Directory API.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use permsync::{
    GroupTree,
    directory::{DirectoryClient, GoogleAuth, GoogleDirectory, google::RetryPolicy},
};
use serde_json::json;

use crate::helpers::spawn_router;

const TOKEN: &str = "test-token";

#[derive(Default)]
struct MockDirectory {
    /// Number of upcoming requests answered with 429.
    throttle: AtomicUsize,
    requests: AtomicUsize,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn throttled(mock: &MockDirectory) -> Option<Response> {
    mock.requests.fetch_add(1, Ordering::SeqCst);
    let remaining = mock.throttle.load(Ordering::SeqCst);
    if remaining == 0 {
        return None;
    }
    mock.throttle.store(remaining - 1, Ordering::SeqCst);
    Some((StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")], "slow down").into_response())
}

/// Two pages of groups for `example.com`.
async fn list_groups(
    State(mock): State<Arc<MockDirectory>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = throttled(&mock) {
        return response;
    }
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if params.get("domain").map(String::as_str) != Some("example.com") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match params.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "groups": [{"email": "eng@example.com"}, {"email": "leads@example.com"}],
            "nextPageToken": "page-2"
        }))
        .into_response(),
        Some("page-2") => Json(json!({
            "groups": [{"email": "ops@example.com"}]
        }))
        .into_response(),
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn list_members(
    State(mock): State<Arc<MockDirectory>>,
    headers: HeaderMap,
    Path(group): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(response) = throttled(&mock) {
        return response;
    }
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let body = match (group.as_str(), params.get("pageToken").map(String::as_str)) {
        ("eng@example.com", None) => json!({
            "members": [
                {"email": "bob@example.com", "type": "USER"},
                {"email": "leads@example.com", "type": "GROUP"}
            ],
            "nextPageToken": "more"
        }),
        ("eng@example.com", Some("more")) => json!({
            "members": [{"id": "C0123", "type": "CUSTOMER"}]
        }),
        ("leads@example.com", None) => json!({
            "members": [
                {"email": "carol@example.com", "type": "USER"},
                {"email": "eng@example.com", "type": "GROUP"}
            ]
        }),
        // An empty group has no members field at all.
        ("ops@example.com", None) => json!({}),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(body).into_response()
}

async fn spawn_mock(mock: Arc<MockDirectory>) -> SocketAddr {
    let router = Router::new()
        .route("/v1/groups", get(list_groups))
        .route("/v1/groups/{group}/members", get(list_members))
        .with_state(mock);
    spawn_router(router).await
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn client(addr: SocketAddr, auth: GoogleAuth) -> GoogleDirectory {
    GoogleDirectory::new("example.com", auth)
        .unwrap()
        .with_base_url(&format!("http://{addr}/v1"))
        .unwrap()
        .with_page_size(2)
        .with_retry_policy(fast_retries(3))
}

#[tokio::test]
async fn test_lists_groups_across_pages() {
    let addr = spawn_mock(Arc::default()).await;
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()));

    assert_eq!(
        client.list_groups().await.unwrap(),
        vec!["eng@example.com", "leads@example.com", "ops@example.com"]
    );
}

#[tokio::test]
async fn test_members_skip_entries_without_email() {
    let addr = spawn_mock(Arc::default()).await;
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()));

    assert_eq!(
        client.list_direct_members("eng@example.com").await.unwrap(),
        vec!["bob@example.com", "leads@example.com"]
    );
    assert!(client.list_direct_members("ops@example.com").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_builds_tree_from_google() {
    let addr = spawn_mock(Arc::default()).await;
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()));

    let tree = GroupTree::build(&client).await.unwrap();
    assert_eq!(tree.group_count(), 3);
    assert_eq!(
        tree.list_group_members("eng@example.com", true).unwrap(),
        vec!["bob@example.com", "carol@example.com"]
    );
}

#[tokio::test]
async fn test_throttled_requests_are_retried() {
    let mock = Arc::new(MockDirectory::default());
    mock.throttle.store(2, Ordering::SeqCst);
    let addr = spawn_mock(mock.clone()).await;
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()));

    let groups = client.list_groups().await.unwrap();
    assert_eq!(groups.len(), 3);
    // Two throttled attempts, then two pages.
    assert_eq!(mock.requests.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_persistent_throttling_gives_up() {
    let mock = Arc::new(MockDirectory::default());
    mock.throttle.store(100, Ordering::SeqCst);
    let addr = spawn_mock(mock.clone()).await;
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()));

    let err = client.list_groups().await.unwrap_err();
    assert!(err.is_directory_fetch_failed());
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(mock.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rejected_token_is_a_fetch_failure() {
    let addr = spawn_mock(Arc::default()).await;
    let client = client(addr, GoogleAuth::Token("wrong".to_string()));

    let err = client.list_groups().await.unwrap_err();
    assert!(err.is_directory_fetch_failed());
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_token_file_is_read_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token");
    std::fs::write(&path, "stale\n").unwrap();

    let addr = spawn_mock(Arc::default()).await;
    let client = client(addr, GoogleAuth::TokenFile(path.clone()));
    assert!(client.list_groups().await.is_err());

    std::fs::write(&path, format!("{TOKEN}\n")).unwrap();
    assert_eq!(client.list_groups().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_directory_is_a_fetch_failure() {
    // Bind and drop a listener to get a port nobody serves.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = client(addr, GoogleAuth::Token(TOKEN.to_string()))
        .with_retry_policy(fast_retries(2));

    let err = client.list_groups().await.unwrap_err();
    assert!(err.is_directory_fetch_failed());
}
