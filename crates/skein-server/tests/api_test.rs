//! Integration tests: start the backend server and drive the pipeline over
//! HTTP with scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use skein_core::inference::ScriptedClient;
use skein_core::{AppState, AppStateInner};

async fn spawn_server(state: AppState) -> String {
    let app = skein_server::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{}", addr)
}

fn count_chunks(sse_body: &str) -> usize {
    sse_body.matches("event: chunk").count()
}

#[tokio::test]
async fn health_check() {
    let state = Arc::new(AppStateInner::for_testing());
    let base_url = spawn_server(state).await;

    let resp = reqwest::get(format!("{}/api/health", base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn chat_without_thread_id_creates_thread_and_streams_run() {
    let state = Arc::new(AppStateInner::for_testing());
    state.scripted_model().push_turn(ScriptedClient::tool_turn(
        "report_completion",
        json!({ "summary": "planned" }),
    ));
    let base_url = spawn_server(state.clone()).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat", base_url))
        .json(&json!({
            "messages": [{ "role": "user", "content": "build me a widget" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let run_id = resp
        .headers()
        .get("x-workflow-run-id")
        .expect("run id header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!run_id.is_empty());

    // The streamed body ends when the planner run completes.
    let body = resp.text().await.unwrap();
    assert!(count_chunks(&body) >= 1);

    // Exactly one thread exists, titled "New Thread", with the stream
    // attached for reattachment.
    let threads = state.threads.list().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "New Thread");
    assert!(threads[0].stream_id.is_some());

    let run = state.engine.get_run(&run_id).await.unwrap();
    assert!(run.is_some());
}

#[tokio::test]
async fn chat_honors_client_provided_thread_id() {
    let state = Arc::new(AppStateInner::for_testing());
    state.scripted_model().push_turn(ScriptedClient::tool_turn(
        "report_completion",
        json!({ "summary": "planned" }),
    ));
    let base_url = spawn_server(state.clone()).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat", base_url))
        .json(&json!({
            "threadId": "client-chosen-id",
            "messages": [{ "role": "user", "content": "hello" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.text().await.unwrap();

    let thread = state.threads.get("client-chosen-id").await.unwrap();
    assert!(thread.is_some());
}

#[tokio::test]
async fn thread_stream_reattaches_at_offset() {
    let state = Arc::new(AppStateInner::for_testing());
    let scripted = state.scripted_model();
    scripted.push_turn(skein_core::inference::ModelTurn {
        text: "working on it".to_string(),
        tool_calls: vec![],
    });
    scripted.push_turn(ScriptedClient::tool_turn(
        "report_completion",
        json!({ "summary": "planned" }),
    ));
    let base_url = spawn_server(state.clone()).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/chat", base_url))
        .json(&json!({ "messages": [{ "role": "user", "content": "go" }] }))
        .send()
        .await
        .unwrap();
    resp.text().await.unwrap();

    let thread_id = state.threads.list().await.unwrap()[0].id.clone();

    let full = client
        .get(format!("{}/api/thread/{}/stream", base_url, thread_id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let total = count_chunks(&full);
    assert!(total >= 2);

    let suffix = client
        .get(format!(
            "{}/api/thread/{}/stream?startIndex=1",
            base_url, thread_id
        ))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(count_chunks(&suffix), total - 1);

    // Past-the-end attach is a clean, empty stream.
    let past_end = client
        .get(format!(
            "{}/api/thread/{}/stream?startIndex=999",
            base_url, thread_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(past_end.status(), 200);
    assert_eq!(count_chunks(&past_end.text().await.unwrap()), 0);
}

#[tokio::test]
async fn thread_crud_and_validation() {
    let state = Arc::new(AppStateInner::for_testing());
    let base_url = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();

    let thread = skein_core::models::Thread::new(
        "t-1".to_string(),
        "Original".to_string(),
        vec![],
    );
    state.threads.save(&thread).await.unwrap();

    // Fetch
    let resp = client
        .get(format!("{}/api/thread/t-1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["title"], "Original");

    // Missing thread
    let resp = client
        .get(format!("{}/api/thread/nope", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Rename validation
    let resp = client
        .put(format!("{}/api/thread/t-1", base_url))
        .json(&json!({ "title": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .put(format!("{}/api/thread/t-1", base_url))
        .json(&json!({ "title": "Renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        state.threads.get("t-1").await.unwrap().unwrap().title,
        "Renamed"
    );

    // Delete
    let resp = client
        .delete(format!("{}/api/thread/t-1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(state.threads.get("t-1").await.unwrap().is_none());
}

#[tokio::test]
async fn webhook_on_known_branch_inherits_thread_and_bumps_version() {
    let state = Arc::new(AppStateInner::for_testing());
    let base_url = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();

    // A finalized spec already targets the commented branch.
    let thread = skein_core::models::Thread::new("t-wh".to_string(), "Widget".to_string(), vec![]);
    state.threads.save(&thread).await.unwrap();
    let mut spec = skein_core::models::Spec::new_draft(
        "t-wh".to_string(),
        "Widget".to_string(),
        "# Widget".to_string(),
        "widgets".to_string(),
    );
    spec.branch = Some("feat/autogen-cafe0123".to_string());
    state.specs.create(&spec).await.unwrap();

    let resp = client
        .post(format!("{}/api/webhook/github", base_url))
        .header("x-github-event", "pull_request_review_comment")
        .json(&json!({
            "action": "created",
            "repository": { "name": "widgets" },
            "pull_request": {
                "number": 7,
                "head": { "ref": "feat/autogen-cafe0123" }
            },
            "comment": {
                "user": { "login": "reviewer" },
                "body": "Please tighten the error handling"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    let update = state
        .specs
        .get(body["specId"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.spec_type, skein_core::models::SpecType::Update);
    assert_eq!(update.version, spec.version + 1);
    assert_eq!(update.thread_id.as_deref(), Some("t-wh"));
    assert_eq!(update.branch.as_deref(), Some("feat/autogen-cafe0123"));

    let thread = state.threads.get("t-wh").await.unwrap().unwrap();
    assert_eq!(
        thread.state,
        skein_core::models::ThreadState::WaitingForFeedback
    );
}

#[tokio::test]
async fn webhook_creates_update_spec_and_queued_job() {
    let state = Arc::new(AppStateInner::for_testing());
    let base_url = spawn_server(state.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/webhook/github", base_url))
        .header("x-github-event", "pull_request_review_comment")
        .json(&json!({
            "action": "created",
            "repository": { "name": "widgets" },
            "pull_request": {
                "number": 7,
                "head": { "ref": "feat/autogen-cafe0123" }
            },
            "comment": {
                "user": { "login": "reviewer" },
                "body": "Please fix the frobnicator",
                "path": "src/widget.rs",
                "line": 42,
                "diff_hunk": "@@ -40,3 +40,4 @@"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["processed"], true);

    let spec_id = body["specId"].as_str().unwrap();
    let spec = state.specs.get(spec_id).await.unwrap().unwrap();
    assert_eq!(spec.branch.as_deref(), Some("feat/autogen-cafe0123"));
    assert!(spec.content.contains("Please fix the frobnicator"));

    let job_id = body["jobId"].as_str().unwrap();
    let job = state.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, skein_core::models::JobStatus::Queued);

    // Manual retrigger starts a worker run for the queued job.
    state.scripted_model().push_turn(ScriptedClient::tool_turn(
        "report_completion",
        json!({ "summary": "done" }),
    ));
    let resp = client
        .put(format!("{}/api/job/{}", base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["runId"].as_str().unwrap().is_empty());

    // Unknown job is a 404.
    let resp = client
        .put(format!("{}/api/job/missing", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
