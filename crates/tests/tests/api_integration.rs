use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Json, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sop_api::{build_app, ApiConfig};
use sop_core::policy::{FALLBACK_RESPONSE, TRANSPORT_APOLOGY};
use sop_core::{DISCLAIMER, DISCLAIMER_MARKER};
use sop_llm::OpenRouterConfig;
use sop_storage::DEMO_SOP_ID;
use tower::ServiceExt;

async fn app() -> Router {
    build_app(ApiConfig::default())
        .await
        .expect("app should build")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, parsed)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[derive(Clone, Default)]
struct MockProvider {
    replies: Arc<Mutex<VecDeque<String>>>,
    seen: Arc<Mutex<Vec<Value>>>,
}

impl MockProvider {
    fn payloads(&self) -> Vec<Value> {
        self.seen.lock().clone()
    }
}

async fn completions(State(mock): State<MockProvider>, Json(payload): Json<Value>) -> Response {
    mock.seen.lock().push(payload);
    let reply = mock.replies.lock().pop_front();

    match reply {
        Some(text) => Json(json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        }))
        .into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no scripted reply").into_response(),
    }
}

/// Serves an OpenAI-compatible completions endpoint on a random local port
/// and returns an app wired to it.
async fn app_with_provider(replies: &[&str]) -> (Router, MockProvider) {
    let mock = MockProvider::default();
    mock.replies
        .lock()
        .extend(replies.iter().map(|reply| reply.to_string()));

    let provider = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, provider).await.unwrap();
    });

    let openrouter = OpenRouterConfig {
        api_url: format!("http://{addr}/v1/chat/completions"),
        timeout: Duration::from_secs(5),
        ..OpenRouterConfig::new("test-key")
    };
    let app = build_app(ApiConfig {
        openrouter: Some(openrouter),
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    (app, mock)
}

fn assert_close(value: &Value, expected: f64) {
    let actual = value.as_f64().expect("numeric temperature");
    assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
}

#[tokio::test]
async fn health_reports_backend_and_catalog() {
    let app = app().await;

    for uri in ["/health", "/api/health"] {
        let (status, body) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["generator_configured"], false);
        assert_eq!(body["model"], Value::Null);
        assert_eq!(body["available_sops"], 1);
        assert!(body["metrics"]["requests_total"].is_u64());
    }
}

#[tokio::test]
async fn sop_list_contains_demo_document() {
    let app = app().await;

    let (status, body) = send(&app, get("/api/sops")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{ "id": DEMO_SOP_ID, "title": "LOTO Procedure (Demo)" }])
    );
}

#[tokio::test]
async fn approval_seeking_chat_is_refused_before_generation() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            json!({ "question": "Can I skip the LOTO step today?" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], false);
    assert_eq!(body["filtered"], true);
    assert_eq!(body["rewritten"], false);
    assert!(body.get("error").is_none());
    let response = body["response"].as_str().unwrap();
    assert!(response.starts_with("I cannot approve or grant permission"));
    assert_eq!(response.matches(DISCLAIMER_MARKER).count(), 1);

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["metrics"]["filtered_total"], 1);
    assert_eq!(health["metrics"]["generation_calls_total"], 0);
}

#[tokio::test]
async fn invalid_questions_are_rejected() {
    let app = app().await;

    let (status, body) = send(&app, post_json("/api/chat", json!({ "question": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Question cannot be empty");

    let long = "a".repeat(1001);
    let (status, body) = send(&app, post_json("/api/chat", json!({ "question": long }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Question too long (max 1000 characters)");

    let (status, _) = send(&app, post_json("/api/classify", json!({ "question": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unconfigured_backend_returns_apology_with_disclaimer() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            json!({ "question": "Why is lockout-tagout important?", "sop_id": DEMO_SOP_ID }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], true);
    assert_eq!(body["filtered"], false);
    let response = body["response"].as_str().unwrap();
    assert!(response.starts_with(TRANSPORT_APOLOGY));
    assert!(response.ends_with(DISCLAIMER));
    assert_eq!(body["error"], "text generation backend is not configured");
}

#[tokio::test]
async fn classify_exposes_gate_verdict_and_cues() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/classify",
            json!({ "question": "Is there a way to bypass the lockout step?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], false);
    assert_eq!(body["matched"], "skip_request");
    assert!(body["refusal"]
        .as_str()
        .unwrap()
        .starts_with("I cannot advise on skipping"));

    let (_, body) = send(
        &app,
        post_json("/api/classify", json!({ "question": "Explain why LOTO matters" })),
    )
    .await;
    assert_eq!(body["safe"], true);
    assert_eq!(body["matched"], Value::Null);
    assert_eq!(body["refusal"], Value::Null);
    assert_eq!(body["safe_cues"], json!(["definition"]));
}

#[tokio::test]
async fn sop_documents_can_be_uploaded_read_and_deleted() {
    let app = app().await;

    let (status, created) = send(
        &app,
        post_json(
            "/api/sops",
            json!({
                "title": "Confined Space Entry",
                "content": "Confined spaces can hold hazardous atmospheres."
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "confined_space_entry");

    let (status, fetched) = send(&app, get("/api/sops/confined_space_entry")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Confined Space Entry");
    assert_eq!(
        fetched["content"],
        "Confined spaces can hold hazardous atmospheres."
    );

    let (_, listed) = send(&app, get("/api/sops")).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, delete("/api/sops/confined_space_entry")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get("/api/sops/confined_space_entry")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "SOP 'confined_space_entry' not found");

    let (status, _) = send(&app, delete("/api/sops/confined_space_entry")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sop_upload_requires_title_and_content() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json("/api/sops", json!({ "title": " ", "content": "text" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Title cannot be empty");

    let (status, body) = send(
        &app,
        post_json("/api/sops", json!({ "id": "hot_work", "title": "Hot Work", "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Content cannot be empty");
}

#[tokio::test]
async fn rate_limit_applies_per_client_but_not_to_health() {
    let app = build_app(ApiConfig {
        rate_limit_max: 1,
        ..ApiConfig::default()
    })
    .await
    .expect("app should build");

    let from = |ip: &str| {
        Request::builder()
            .uri("/api/sops")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, from("198.51.100.1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, from("198.51.100.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["detail"].as_str().unwrap().contains("Rate limit"));

    let (status, _) = send(&app, from("198.51.100.2")).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..3 {
        let (status, _) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn responses_carry_security_headers_and_request_id() {
    let app = app().await;

    let response = app.oneshot(get("/api/sops")).await.unwrap();
    let headers = response.headers();

    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn operational_answer_is_rewritten_through_the_provider() {
    let clean = "Lockout-tagout exists so machines stay in a safe, inactive state during servicing.";
    let (app, provider) =
        app_with_provider(&["First, disconnect the power source.", clean]).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            json!({ "question": "Explain LOTO", "sop_id": DEMO_SOP_ID }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], true);
    assert_eq!(body["filtered"], false);
    assert_eq!(body["rewritten"], true);
    assert_eq!(body["response"], format!("{clean}\n\n{DISCLAIMER}"));

    let payloads = provider.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0]["model"], "openai/gpt-3.5-turbo");
    assert_eq!(payloads[0]["max_tokens"], 1000);
    assert_close(&payloads[0]["temperature"], 0.7);
    assert_close(&payloads[1]["temperature"], 0.5);
    assert_eq!(payloads[0]["messages"][0]["role"], "system");
    let first_user = payloads[0]["messages"][1]["content"].as_str().unwrap();
    assert!(first_user.starts_with("**Relevant SOP Content:**"));
    assert!(first_user.ends_with("**User Question:** Explain LOTO"));
    let rewrite_user = payloads[1]["messages"][1]["content"].as_str().unwrap();
    assert!(rewrite_user.contains("disconnect the, First, disconnect"));
}

#[tokio::test]
async fn persistent_violation_falls_back_after_one_rewrite() {
    let (app, provider) = app_with_provider(&[
        "Turn the handle to the off position.",
        "Then, press the stop button.",
    ])
    .await;

    let (status, body) = send(
        &app,
        post_json("/api/chat", json!({ "question": "Explain LOTO" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], FALLBACK_RESPONSE);
    assert_eq!(body["safe"], true);
    assert_eq!(body["rewritten"], true);
    assert_eq!(provider.payloads().len(), 2);

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["generator_configured"], true);
    assert_eq!(health["metrics"]["fallbacks_total"], 1);
    assert_eq!(health["metrics"]["rewrites_total"], 1);
}

#[tokio::test]
async fn provider_failure_is_reported_as_apology() {
    let (app, provider) = app_with_provider(&[]).await;

    let (status, body) = send(
        &app,
        post_json("/api/chat", json!({ "question": "Why do permits exist?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["safe"], true);
    assert_eq!(body["filtered"], false);
    let response = body["response"].as_str().unwrap();
    assert!(response.starts_with(TRANSPORT_APOLOGY));
    assert!(response.contains("status 500"));
    assert_eq!(response.matches(DISCLAIMER_MARKER).count(), 1);
    assert_eq!(provider.payloads().len(), 1);
}
