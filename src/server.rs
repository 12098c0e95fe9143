//! HTTP API over the journal pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/entries` | Save an entry (`{text, date?}`), process it in the background |
//! | `GET`  | `/entries` | Entry dates, most recent first |
//! | `GET`  | `/entries/{date}` | One entry with its enrichment |
//! | `POST` | `/search` | Similarity search (`{query, k?}`) |
//! | `POST` | `/chat` | Answer a question over the journal (`{question, history?}`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `validation_failure`
//! (400), `model_unavailable` / `malformed_response` /
//! `invalid_chunk_structure` (502), `stale_index` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use journal_harness_core::models::{parse_date, ProcessingStatus, RankedChunk};
use journal_harness_core::store::{entry_detail, EntryDetail};
use journal_harness_core::PipelineError;

use crate::app::Services;
use crate::chat::ChatAnswer;
use crate::llm::ChatMessage;

/// Build the router over shared services.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/entries", post(handle_save_entry).get(handle_list_entries))
        .route("/entries/{date}", get(handle_get_entry))
        .route("/search", post(handle_search))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(services)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(services);

    println!("Journal server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Map pipeline failures to their own codes; anything else is internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let Some(pipeline) = err.downcast_ref::<PipelineError>() else {
            return AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message,
            };
        };
        let status = match pipeline {
            PipelineError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            PipelineError::ModelUnavailable(_)
            | PipelineError::MalformedResponse(_)
            | PipelineError::InvalidChunkStructure(_) => StatusCode::BAD_GATEWAY,
            PipelineError::StaleIndex { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::FileAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: pipeline.code().to_string(),
            message,
        }
    }
}

fn parse_date_param(s: &str) -> Result<NaiveDate, AppError> {
    parse_date(s).map_err(|e| bad_request(e.to_string()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /entries ============

#[derive(Deserialize)]
struct SaveEntryRequest {
    text: String,
    /// `YYYY-MM-DD`; today (local time) when omitted.
    date: Option<String>,
}

#[derive(Serialize)]
struct SaveEntryResponse {
    date: NaiveDate,
    entry_id: String,
    status: ProcessingStatus,
}

/// Handler for `POST /entries`.
///
/// Returns `202 Accepted` as soon as the raw entry is stored; analysis,
/// chunking, and indexing continue in the background.
async fn handle_save_entry(
    State(services): State<Services>,
    Json(req): Json<SaveEntryRequest>,
) -> Result<(StatusCode, Json<SaveEntryResponse>), AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let date = match req.date.as_deref() {
        Some(d) => parse_date_param(d)?,
        None => chrono::Local::now().date_naive(),
    };

    let entry = services.orchestrator.submit(date, &req.text).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SaveEntryResponse {
            date: entry.date,
            entry_id: entry.entry_id,
            status: entry.status,
        }),
    ))
}

#[derive(Serialize)]
struct ListEntriesResponse {
    dates: Vec<NaiveDate>,
}

async fn handle_list_entries(
    State(services): State<Services>,
) -> Result<Json<ListEntriesResponse>, AppError> {
    let dates = services.store.list_dates().await?;
    Ok(Json(ListEntriesResponse { dates }))
}

async fn handle_get_entry(
    State(services): State<Services>,
    Path(date): Path<String>,
) -> Result<Json<EntryDetail>, AppError> {
    let date = parse_date_param(&date)?;
    let detail = entry_detail(services.store.as_ref(), date)
        .await?
        .ok_or_else(|| not_found(format!("no entry for {}", date)))?;
    Ok(Json(detail))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RankedChunk>,
}

async fn handle_search(
    State(services): State<Services>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = req.k.unwrap_or(services.config.retrieval.top_k);
    let results = services.query.search(&req.query, k).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

async fn handle_chat(
    State(services): State<Services>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    let answer = services
        .assistant
        .answer(&req.question, &req.history)
        .await?;
    Ok(Json(answer))
}
