//! History budgeting seen from the upstream side
//!
//! Sends long conversations through the router and inspects what the mock
//! backend actually received.

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chat_relay::{
    config::Config,
    conversation::{Message, Role},
    handlers::{self, AppState},
    tokenizer::{CharEstimator, TokenEstimator},
};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

const TOKEN_LIMIT: usize = 200;
const RESERVED: usize = 50;

async fn upstream() -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: [DONE]\n\n"),
        )
        .mount(&mock_server)
        .await;
    mock_server
}

fn state(base_url: &str, policy: &str) -> AppState {
    let config = Config::from_str(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[backend]
kind = "simple"
base_url = "{base_url}"

[budget]
token_limit = {TOKEN_LIMIT}
reserved_response_tokens = {RESERVED}
policy = "{policy}"
tokenizer = "heuristic"
"#
    ))
    .expect("should parse test config");
    AppState::new(Arc::new(config)).unwrap()
}

/// Twenty alternating turns of roughly 100 tokens each
fn long_conversation() -> Vec<Value> {
    (0..20)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            json!({"role": role, "content": format!("{:02}{}", i, "x".repeat(398))})
        })
        .collect()
}

async fn forwarded_messages(mock_server: &MockServer, state: AppState) -> Vec<Message> {
    let response = handlers::router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "messages": long_conversation(),
                        "chatOptions": {"selectedModel": "m", "systemPrompt": "Be brief."}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await;

    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
    serde_json::from_value(sent["messages"].clone()).unwrap()
}

#[tokio::test]
async fn test_front_policy_keeps_system_prompt_and_latest_turn() {
    let mock_server = upstream().await;
    let state = state(&mock_server.uri(), "front");
    let metrics = Arc::clone(state.metrics());

    let messages = forwarded_messages(&mock_server, state).await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::system("Be brief."));
    assert!(messages[1].content().starts_with("19"));
    assert_eq!(metrics.trimmed_count(), 19);
}

#[tokio::test]
async fn test_middle_policy_respects_budget() {
    let mock_server = upstream().await;
    let state = state(&mock_server.uri(), "middle");

    let messages = forwarded_messages(&mock_server, state).await;

    assert!(CharEstimator.estimate(&messages) <= TOKEN_LIMIT - RESERVED);
    assert_eq!(messages[0].role(), Role::System);
    assert_eq!(messages[0].content(), "Be brief.");
    assert!(
        messages
            .iter()
            .skip(1)
            .all(|message| message.role() != Role::System)
    );
}

#[tokio::test]
async fn test_oversized_single_message_is_still_forwarded() {
    let mock_server = upstream().await;
    let state = state(&mock_server.uri(), "front");

    let response = handlers::router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "messages": [{"role": "user", "content": "y".repeat(4000)}],
                        "chatOptions": {"selectedModel": "m"}
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await;

    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_settings_reports_the_enforced_limit() {
    let mock_server = upstream().await;
    let response = handlers::router(state(&mock_server.uri(), "middle"))
        .oneshot(
            Request::builder()
                .uri("/api/settings")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"tokenLimit": TOKEN_LIMIT}));
}
