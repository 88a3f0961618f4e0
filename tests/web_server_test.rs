use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use insights_advisor::backend::{ChatBackend, ScriptedBackend};
use insights_advisor::session::Session;
use insights_advisor::web_server::{build_router, AppState};

const CSV: &str = "product,sales\nA,10\nB,20\nC,5\n";

fn server_with(backend: Arc<dyn ChatBackend>) -> (TestServer, Session) {
    let session = Session::new();
    let app = build_router(AppState::new(session.clone(), backend));
    (TestServer::new(app).unwrap(), session)
}

async fn upload(server: &TestServer) {
    server
        .post("/api/dataset")
        .json(&json!({ "file_name": "sales.csv", "content": CSV }))
        .await
        .assert_status_ok();
}

async fn wait_until_idle(session: &Session) {
    let mut rx = session.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.messages.iter().all(|m| m.status.is_terminal())),
    )
    .await
    .expect("reply should finish")
    .unwrap();
}

#[tokio::test]
async fn test_index_renders_template() {
    let (server, _) = server_with(Arc::new(ScriptedBackend::reply(["hi"])));
    let response = server.get("/").await;
    response.assert_status_ok();
    assert!(response.text().contains("Business Insights Advisor"));
    assert!(response.text().contains("scripted"));
}

#[tokio::test]
async fn test_upload_returns_preview_and_greets() {
    let (server, session) = server_with(Arc::new(ScriptedBackend::reply(["hi"])));

    let empty: Value = server.get("/api/dataset").await.json();
    assert!(empty["preview"].is_null());

    let response = server
        .post("/api/dataset")
        .json(&json!({ "file_name": "sales.csv", "content": CSV }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["preview"]["headers"], json!(["product", "sales"]));
    assert_eq!(body["preview"]["total_rows"], 3);

    let transcript: Value = server.get("/api/transcript").await.json();
    assert_eq!(transcript["messages"].as_array().unwrap().len(), 1);
    assert_eq!(transcript["messages"][0]["sender"], "assistant");
    assert!(session.dataset().await.is_some());
}

#[tokio::test]
async fn test_upload_rejects_bad_files() {
    let (server, _) = server_with(Arc::new(ScriptedBackend::reply(["hi"])));

    let response = server
        .post("/api/dataset")
        .json(&json!({ "file_name": "sales.xlsx", "content": CSV }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Invalid file type. Please upload a .csv file.");

    server
        .post("/api/dataset")
        .json(&json!({ "file_name": "sales.csv", "content": "only,a,header" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_requires_dataset_and_question() {
    let (server, _) = server_with(Arc::new(ScriptedBackend::reply(["hi"])));
    server
        .post("/api/chat")
        .json(&json!({ "question": "total?" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    upload(&server).await;
    server
        .post("/api/chat")
        .json(&json!({ "question": "  " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[test_log::test(tokio::test)]
async fn test_chat_streams_reply_into_transcript() {
    let backend = Arc::new(ScriptedBackend::reply([
        "Total sales are 35.",
        "||CHART_DATA||{\"type\":\"bar\",\"title\":\"Sales\",\"data\":[{\"name\":\"A\",\"value\":10}]}",
    ]));
    let (server, session) = server_with(backend.clone());
    upload(&server).await;

    let response = server
        .post("/api/chat")
        .json(&json!({ "question": "What are total sales?" }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let accepted: Value = response.json();
    assert!(accepted["message_id"].is_string());

    wait_until_idle(&session).await;

    let transcript: Value = server.get("/api/transcript").await.json();
    let messages = transcript["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["id"], accepted["message_id"]);
    assert_eq!(messages[2]["status"], "done");
    assert_eq!(messages[2]["text"], "Total sales are 35.");
    assert_eq!(messages[2]["chart"]["type"], "bar");
    assert_eq!(backend.requests().await.len(), 1);
}

#[tokio::test]
async fn test_second_question_conflicts_while_busy() {
    let (server, session) = server_with(Arc::new(ScriptedBackend::reply(["ok"])));
    upload(&server).await;

    // Open a reply directly so it stays in flight
    let pending = session.begin_turn("first").await.unwrap();

    server
        .post("/api/chat")
        .json(&json!({ "question": "second" }))
        .await
        .assert_status(StatusCode::CONFLICT);

    session
        .run_turn(pending, &ScriptedBackend::reply(["done"]))
        .await;
    server
        .post("/api/chat")
        .json(&json!({ "question": "second" }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    wait_until_idle(&session).await;
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let (server, session) = server_with(Arc::new(ScriptedBackend::reply(["ok"])));
    upload(&server).await;

    server
        .post("/api/reset")
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let transcript: Value = server.get("/api/transcript").await.json();
    assert!(transcript["messages"].as_array().unwrap().is_empty());
    let dataset: Value = server.get("/api/dataset").await.json();
    assert!(dataset["preview"].is_null());
    assert!(session.snapshot().messages.is_empty());
    assert!(!session.is_busy().await);
}
