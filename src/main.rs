mod feedback;
mod firestore;
mod http;
mod idempotency;
mod listing;
mod llm;
mod location;
mod metrics;
mod models;
mod pricing;
mod security;
mod session;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use feedback::{FeedbackService, calculate_feedback_stats};
use firestore::FirestoreClient;
use listing::ListingStorage;
use llm::{LlmClient, LlmConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeRequest, AnalyzeResponse, ApiError, LocationSummary, ServiceError, ServiceErrorKind,
    SessionContext,
};
use pricing::{blend_pricing, format_pricing_insights, get_comparable_items};
use security::{AuthState, require_api_auth};
use serde::Deserialize;
use serde_json::json;
use session::SessionManager;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "pricelens.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let store = FirestoreClient::from_env();
    let llm = Arc::new(LlmClient::new(LlmConfig::from_env()));
    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());

    let state = AppState {
        sessions: SessionManager::new(store.clone()),
        feedback: FeedbackService::new(store.clone()),
        listings: ListingStorage::new(store.clone()),
        sold_prices: store,
        llm,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/activity", post(session_activity))
        .route("/sessions/{id}/link", post(link_session))
        .route("/pricing/analyze", post(analyze_pricing))
        .route("/feedback", post(submit_feedback))
        .route("/feedback/listing/{listing_id}", get(feedback_for_listing))
        .route("/feedback/recent", get(recent_feedback))
        .route("/listings", post(create_listing).get(list_listings))
        .route("/listings/{id}", get(get_listing).patch(update_listing))
        .route("/listings/{id}/marketplace", get(listing_for_marketplace))
        .route("/listings/{id}/share", post(share_listing))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "pricelens.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    sessions: SessionManager<FirestoreClient>,
    feedback: FeedbackService<FirestoreClient>,
    listings: ListingStorage<FirestoreClient>,
    sold_prices: FirestoreClient,
    llm: Arc<LlmClient>,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, AnalyzeResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

#[derive(Debug)]
enum AppError {
    Service(ServiceError),
    NotFound(&'static str),
}

impl From<ServiceError> for AppError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Service(err) => {
                let status = match err.kind() {
                    ServiceErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ServiceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.scope().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::NotFound(scope) => {
                let payload = ApiError {
                    error: scope.to_string(),
                    detail: Some("not_found".to_string()),
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
        }
    }
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "pricelens-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Service(ServiceError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>PriceLens API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(10 * 1024 * 1024)
}

// -------- sessions --------

#[derive(Debug, Deserialize)]
struct SessionRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user: Option<session::UserRef>,
    #[serde(default)]
    region: Option<String>,
}

/// Initialize or resume a session.
///
/// - Method: `POST`
/// - Path: `/sessions`
/// - Body: `SessionRequest`
/// - Response: the full `Session` record, freshly minted or upgraded
async fn create_session(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<SessionRequest>,
) -> Json<session::Session> {
    metrics::inc_requests("/sessions");
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let session = state
        .sessions
        .initialize_session(
            payload.session_id.as_deref(),
            payload.user.as_ref(),
            payload.region.as_deref(),
            user_agent,
        )
        .await;
    Json(session)
}

async fn session_activity(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    metrics::inc_requests("/sessions/activity");
    state.sessions.update_session_activity(&id).await;
    StatusCode::NO_CONTENT
}

async fn link_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(user): Json<session::UserRef>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/sessions/link");
    let linked = state.sessions.link_session_to_user(&id, &user).await;
    Json(json!({"linked": linked}))
}

// -------- pricing --------

/// Run the full pricing flow: AI estimate, comparable retrieval, blend.
///
/// - Method: `POST`
/// - Path: `/pricing/analyze`
/// - Honors `Idempotency-Key` for safe client retries
async fn analyze_pricing(
    State(state): State<AppState>,
    Extension(context): Extension<security::AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    metrics::inc_requests("/pricing/analyze");
    info!(
        target = "pricelens.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        item = %payload.item_name,
        "pricing analysis invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let response = run_analysis(&state, payload).await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let response = run_analysis(&state, payload).await?;
        state.idempotency.lock().await.insert(key, response.clone());
        return Ok(Json(response));
    }

    Ok(Json(run_analysis(&state, payload).await?))
}

async fn run_analysis(
    state: &AppState,
    payload: AnalyzeRequest,
) -> Result<AnalyzeResponse, AppError> {
    let item_name = payload.item_name.trim();
    if item_name.is_empty() {
        return Err(ServiceError::invalid_input("analyze", "missing_item_name").into());
    }
    let category = payload.category.trim();
    if category.is_empty() {
        return Err(ServiceError::invalid_input("analyze", "missing_category").into());
    }

    if let Some(session_id) = payload.session_id.as_deref() {
        state.sessions.update_session_activity(session_id).await;
    }

    let parsed_location = location::parse_location(payload.location.as_deref().unwrap_or(""));
    let description = location::location_description(&parsed_location);

    let (ai_estimate, estimate_source) = match payload.ai_estimate {
        Some(estimate) => (estimate.normalized(), "client"),
        None => {
            let estimate = state
                .llm
                .estimate_price(
                    item_name,
                    category,
                    payload.condition.as_deref(),
                    &description,
                    &payload.images,
                )
                .await
                .map_err(|err| match err {
                    llm::LlmError::InvalidImage(detail) => {
                        ServiceError::invalid_input("ai_estimate", detail)
                    }
                    other => ServiceError::internal("ai_estimate", other.to_string()),
                })?;
            (estimate, "model")
        }
    };

    let started = Instant::now();
    let comparables =
        get_comparable_items(&state.sold_prices, item_name, category, &parsed_location).await;
    metrics::op_elapsed("comparable_retrieval", started.elapsed().as_millis());
    if comparables.is_none() {
        metrics::store_fallback("comparable_retrieval");
    }

    let recommendation = blend_pricing(&ai_estimate, comparables.as_ref());
    let insights = format_pricing_insights(comparables.as_ref(), &parsed_location);
    info!(
        target = "pricelens.pricing",
        item = item_name,
        category,
        data_count = recommendation.data_count,
        confidence = recommendation.confidence_score,
        "analysis_complete"
    );

    Ok(AnalyzeResponse {
        analysis_id: format!("ANL-{}", Uuid::new_v4().simple()),
        recommendation,
        comparables,
        insights,
        location: LocationSummary {
            description,
            insight: location::location_pricing_insight(&parsed_location),
            parsed: parsed_location,
        },
        estimate_source: estimate_source.to_string(),
    })
}

// -------- feedback --------

#[derive(Debug, Deserialize)]
struct FeedbackSubmission {
    feedback: feedback::RawFeedback,
    session: SessionContext,
    #[serde(default)]
    profile: Option<feedback::UserProfile>,
}

/// Submit trust-weighted feedback for a listing.
///
/// Validation failures come back as `{success: false, error}` with a 200;
/// only transport-level problems produce error statuses.
async fn submit_feedback(
    State(state): State<AppState>,
    Json(payload): Json<FeedbackSubmission>,
) -> Json<feedback::SubmitOutcome> {
    metrics::inc_requests("/feedback");
    let outcome = state
        .feedback
        .submit_feedback(
            &payload.feedback,
            &payload.session,
            payload.profile.as_ref(),
        )
        .await;
    Json(outcome)
}

async fn feedback_for_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/feedback/listing");
    let events = state.feedback.get_feedback_for_listing(&listing_id).await;
    let stats = calculate_feedback_stats(&events);
    Json(json!({"feedback": events, "stats": stats}))
}

#[derive(Debug, Deserialize)]
struct RecentFeedbackQuery {
    #[serde(default = "default_days")]
    days: i64,
    #[serde(default = "default_max_results")]
    max_results: u32,
}

fn default_days() -> i64 {
    30
}

fn default_max_results() -> u32 {
    100
}

async fn recent_feedback(
    State(state): State<AppState>,
    Query(query): Query<RecentFeedbackQuery>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/feedback/recent");
    let events = state
        .feedback
        .get_recent_feedback(query.days, query.max_results)
        .await;
    let stats = calculate_feedback_stats(&events);
    Json(json!({"feedback": events, "stats": stats}))
}

// -------- listings --------

#[derive(Debug, Deserialize)]
struct CreateListingRequest {
    #[serde(flatten)]
    draft: listing::ListingDraft,
    #[serde(default)]
    user_id: Option<String>,
}

async fn create_listing(
    State(state): State<AppState>,
    Json(payload): Json<CreateListingRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("/listings");
    let listing_id = state
        .listings
        .save_listing(payload.draft, payload.user_id.as_deref())
        .await
        .map_err(|err| ServiceError::internal("save_listing", err.to_string()))?;
    Ok(Json(json!({"listing_id": listing_id})))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<listing::Listing>, AppError> {
    metrics::inc_requests("/listings/get");
    match state.listings.get_listing(&id).await {
        Some(listing) => Ok(Json(listing)),
        None => Err(AppError::NotFound("listing")),
    }
}

async fn listing_for_marketplace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<listing::MarketplaceListing>, AppError> {
    metrics::inc_requests("/listings/marketplace");
    match state.listings.get_listing(&id).await {
        Some(listing) => Ok(Json(listing::format_for_marketplace(&listing))),
        None => Err(AppError::NotFound("listing")),
    }
}

async fn update_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(updates): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/listings/update");
    let success = state.listings.update_listing(&id, updates).await;
    Json(json!({"success": success}))
}

async fn share_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/listings/share");
    let success = state.listings.increment_share_count(&id).await;
    Json(json!({"success": success}))
}

#[derive(Debug, Deserialize)]
struct ListListingsQuery {
    user_id: String,
    #[serde(default)]
    limit: Option<u32>,
}

async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListListingsQuery>,
) -> Json<serde_json::Value> {
    metrics::inc_requests("/listings/list");
    let listings = state
        .listings
        .get_all_listings(&query.user_id, query.limit)
        .await;
    // Tier comes from the rows returned; the default cap of 50 sits above
    // the platinum threshold.
    let count = listings.len();
    let tier = models::calculate_tier(count as u32);
    Json(json!({
        "listings": listings,
        "count": count,
        "tier": tier,
    }))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
