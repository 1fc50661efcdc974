mod config;
mod rate_limit;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Json, Path, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use serde::{Deserialize, Serialize};
use sop_agents::ExplainerAgent;
use sop_core::{
    advisory_safe_cues, validate_question, ComplianceResult, ExplainRequest, QuestionError,
    SafeCue, UnsafeIntent,
};
use sop_llm::Generator;
use sop_observability::{AppMetrics, MetricsSnapshot};
use sop_storage::{
    load_sop_dir, sop_id_from_title, SopDocument, SopRepository, SopSummary, Store,
};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use crate::config::ApiConfig;
pub use crate::rate_limit::IpRateLimiter;

const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_SOP_TITLE_LEN: usize = 200;

pub type Agent = ExplainerAgent<Generator, Store>;

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<Agent>,
    pub generator: Arc<Generator>,
    pub metrics: Arc<AppMetrics>,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
}

impl ApiState {
    fn store(&self) -> &Store {
        self.agent.store()
    }
}

#[derive(Debug, Error)]
enum ApiError {
    #[error(transparent)]
    InvalidQuestion(#[from] QuestionError),
    #[error("{0}")]
    BadRequest(String),
    #[error("SOP '{0}' not found")]
    SopNotFound(String),
    #[error("{context}")]
    Storage {
        context: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    fn storage(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |cause| Self::Storage { context, cause }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidQuestion(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SopNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage { context, cause } => {
                error!(error = %cause, "{context}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

pub async fn build_app(config: ApiConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = Store::open(config.database_url.as_deref())
        .await
        .context("failed to open SOP store")?;
    if let Some(root) = config.docs_root.as_ref() {
        let documents = load_sop_dir(root)?;
        let loaded = documents.len();
        for document in documents {
            store
                .upsert_sop(document)
                .await
                .context("failed to store SOP document")?;
        }
        info!(root = %root.display(), loaded, "loaded SOP documents");
    }

    let generator = Arc::new(config.generator());
    if !generator.is_configured() {
        tracing::warn!("OPENROUTER_API_KEY not set, explanations will return the service apology");
    }

    let agent = Arc::new(ExplainerAgent::new(
        generator.clone(),
        Arc::new(store),
        config.loop_settings,
        metrics.clone(),
    ));

    let state = ApiState {
        agent,
        generator,
        metrics,
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
    };

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/sops", get(list_sops).post(upsert_sop))
        .route("/api/sops/:sop_id", get(get_sop).delete(delete_sop))
        .route("/api/chat", post(chat))
        .route("/api/classify", post(classify))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    generator_configured: bool,
    model: Option<String>,
    available_sops: usize,
    metrics: MetricsSnapshot,
}

async fn health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, ApiError> {
    let available_sops = state
        .store()
        .list_sops()
        .await
        .map_err(ApiError::storage("failed listing SOPs for health check"))?
        .len();

    Ok(Json(HealthResponse {
        status: "healthy",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        generator_configured: state.generator.is_configured(),
        model: state.generator.model().map(str::to_string),
        available_sops,
        metrics: state.metrics.snapshot(),
    }))
}

async fn list_sops(State(state): State<ApiState>) -> Result<Json<Vec<SopSummary>>, ApiError> {
    let summaries = state
        .store()
        .list_sops()
        .await
        .map_err(ApiError::storage("Error fetching SOPs"))?;
    Ok(Json(summaries))
}

async fn get_sop(
    State(state): State<ApiState>,
    Path(sop_id): Path<String>,
) -> Result<Json<SopDocument>, ApiError> {
    let document = state
        .store()
        .get_sop(&sop_id)
        .await
        .map_err(ApiError::storage("Error fetching SOP"))?;

    match document {
        Some(document) => Ok(Json(document)),
        None => Err(ApiError::SopNotFound(sop_id)),
    }
}

#[derive(Debug, Deserialize)]
struct SopUpsertRequest {
    #[serde(default)]
    id: Option<String>,
    title: String,
    content: String,
}

async fn upsert_sop(
    State(state): State<ApiState>,
    Json(request): Json<SopUpsertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_SOP_TITLE_LEN {
        return Err(ApiError::BadRequest(format!(
            "Title too long (max {MAX_SOP_TITLE_LEN} characters)"
        )));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Content cannot be empty".to_string()));
    }

    let sop_id = request
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| sop_id_from_title(title));
    let document = SopDocument::new(sop_id, title, request.content.trim());

    state
        .store()
        .upsert_sop(document.clone())
        .await
        .map_err(ApiError::storage("Error storing SOP"))?;
    info!(sop_id = %document.id, "SOP document stored");

    Ok((StatusCode::CREATED, Json(document)))
}

async fn delete_sop(
    State(state): State<ApiState>,
    Path(sop_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .store()
        .delete_sop(&sop_id)
        .await
        .map_err(ApiError::storage("Error deleting SOP"))?;

    if removed {
        info!(sop_id = %sop_id, "SOP document deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SopNotFound(sop_id))
    }
}

async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ExplainRequest>,
) -> Result<Json<ComplianceResult>, ApiError> {
    validate_question(&request.question)?;
    Ok(Json(state.agent.explain(request).await))
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    safe: bool,
    matched: Option<UnsafeIntent>,
    refusal: Option<String>,
    safe_cues: Vec<SafeCue>,
}

async fn classify(
    State(state): State<ApiState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let question = validate_question(&request.question)?;
    let verdict = state.agent.classify(question);

    Ok(Json(ClassifyResponse {
        safe: verdict.safe,
        matched: verdict.matched,
        refusal: verdict.refusal_text,
        safe_cues: advisory_safe_cues(question),
    }))
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:5173")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_health_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "detail": "Rate limit exceeded. Please wait and try again."
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn is_health_endpoint(path: &str) -> bool {
    matches!(path, "/health" | "/api/health")
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'"),
    );

    response
}
