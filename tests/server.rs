//! HTTP-level tests of the search endpoint over an in-process store.

use chrono::{TimeZone, Utc};
use issue_harvest::models::IssueRow;
use issue_harvest::search::SearchGateway;
use issue_harvest::server::build_router;
use issue_harvest::store::memory::MemoryStore;
use issue_harvest::store::{Schema, TargetStore};
use serde_json::Value;
use std::sync::Arc;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let schema = Schema::new("github_issues", "information");
    for statement in schema.setup_statements() {
        store.execute(&statement, &[]).await.unwrap();
    }
    let rows = [
        ("crash when loading config", 1),
        ("typo in README", 2),
        ("crash on shutdown", 3),
        ("100% cpu in idle loop", 4),
    ];
    for (title, day) in rows {
        let row = IssueRow {
            title: title.to_string(),
            body: Some(format!("details about {}", title)),
            author: "octocat".to_string(),
            created_at: Utc.with_ymd_and_hms(2021, 6, day, 9, 0, 0).unwrap(),
            url: None,
        };
        store
            .execute(&schema.insert_statement(), &Schema::insert_params(&row))
            .await
            .unwrap();
    }
    store
}

async fn start(store: Arc<MemoryStore>) -> (u16, tokio::task::JoinHandle<()>) {
    let gateway = Arc::new(SearchGateway::new(
        store,
        Schema::new("github_issues", "information"),
    ));
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, build_router(gateway)).await.unwrap();
    });
    wait_for_server(port).await;
    (port, handle)
}

#[tokio::test]
async fn search_returns_matches_newest_first() {
    let (port, handle) = start(seeded_store().await).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/?searchText=crash", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["crash on shutdown", "crash when loading config"]);
    assert_eq!(body[0]["author"], "octocat");
    assert!(body[0]["created_at"].as_str().unwrap().starts_with("2021-06-03"));

    handle.abort();
}

#[tokio::test]
async fn q_alias_and_literal_wildcards() {
    let (port, handle) = start(seeded_store().await).await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/?q=100%25", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], "100% cpu in idle loop");

    handle.abort();
}

#[tokio::test]
async fn missing_parameter_is_bad_request() {
    let (port, handle) = start(seeded_store().await).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    handle.abort();
}

#[tokio::test]
async fn internal_errors_are_not_exposed() {
    // No setup: the view does not exist.
    let (port, handle) = start(Arc::new(MemoryStore::new())).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/?searchText=crash", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains("information"), "leaked: {}", message);

    handle.abort();
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let (port, handle) = start(seeded_store().await).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/?searchText=typo", port))
        .header("Origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap()),
        Some("*")
    );

    handle.abort();
}
