//! Read-only search endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/?searchText=<text>` | Rows whose title contains the text, newest first (`q` is accepted as an alias) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "searchText is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). Internal errors are
//! logged in full; the response only carries a generic message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the endpoint can be
//! called from a browser front end on another origin.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::models::IssueRow;
use crate::search::SearchGateway;
use crate::store::postgres::PgStore;
use crate::store::Schema;

/// Starts the search server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let gateway = Arc::new(SearchGateway::new(
        Arc::new(PgStore::new(pool)),
        Schema::from_config(&config.load),
    ));

    let app = build_router(gateway);
    let bind_addr = config.server.bind.clone();
    println!("Search server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, view = %config.load.view, "search server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Router with all routes and CORS, over any gateway.
pub fn build_router(gateway: Arc<SearchGateway>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(gateway)
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

fn internal_error() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "search failed".to_string(),
    }
}

// ============ GET / ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(rename = "searchText")]
    search_text: Option<String>,
    q: Option<String>,
}

async fn handle_search(
    State(gateway): State<Arc<SearchGateway>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<IssueRow>>, AppError> {
    let text = params
        .search_text
        .or(params.q)
        .ok_or_else(|| bad_request("searchText is required"))?;

    match gateway.search(&text).await {
        Ok(rows) => Ok(Json(rows)),
        Err(e) => {
            error!(error = %e, query = %text, "search request failed");
            Err(internal_error())
        }
    }
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
