//! HTTP API handlers for triggering and inspecting importer runs.
//!
//! # Endpoints
//!
//! - **GET /health**: Liveness probe.
//! - **GET /importers**: Configured importers and their settings.
//! - **POST /importers/:name/run**: Run one importer now and return its
//!   [`RunSummary`].
//! - **GET /importers/:name/records**: Import records of one importer,
//!   optionally filtered by `?status=`.
//!
//! # Concurrency
//!
//! Each importer has its own lock. Triggering an importer that is already
//! running returns `409 Conflict` instead of queueing a second run.
//!
//! # Secrets
//!
//! Error bodies carry [`ImportError`] messages, which are redacted before
//! they are built. Credentials are never logged or returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::data_sources::SourceAdapter;
use crate::error::ImportError;
use crate::model::{Bundle, ImportRecord, ImportStatus, RunSummary};
use crate::reconcile::Reconciler;

/// One configured importer and its run lock.
struct ImporterSlot {
    adapter: Box<dyn SourceAdapter>,
    running: Mutex<()>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    reconciler: Reconciler,
    importers: Arc<BTreeMap<String, ImporterSlot>>,
}

impl AppState {
    /// Create the state from a reconciler and the configured adapters.
    pub fn new(reconciler: Reconciler, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        let importers = adapters
            .into_iter()
            .map(|adapter| {
                let name = adapter.importer().to_string();
                let slot = ImporterSlot {
                    adapter,
                    running: Mutex::new(()),
                };
                (name, slot)
            })
            .collect();

        Self {
            reconciler,
            importers: Arc::new(importers),
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/importers", get(list_importers))
        .route("/importers/:name/run", post(run_importer))
        .route("/importers/:name/records", get(list_records))
        .with_state(state)
}

// ============================================================================
// Response Types
// ============================================================================

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Summary of one configured importer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImporterInfo {
    pub name: String,
    pub bundle: Bundle,
    pub limit: usize,
    pub max_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportersResponse {
    pub importers: Vec<ImporterInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub status: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /importers - List configured importers.
pub async fn list_importers(State(state): State<AppState>) -> Json<ImportersResponse> {
    let importers = state
        .importers
        .values()
        .map(|slot| {
            let settings = slot.adapter.settings();
            ImporterInfo {
                name: settings.name.clone(),
                bundle: slot.adapter.bundle(),
                limit: settings.limit,
                max_attempts: settings.max_attempts,
            }
        })
        .collect();

    Json(ImportersResponse { importers })
}

/// POST /importers/:name/run - Run an importer once.
///
/// # Response
///
/// - `200 OK` with the run summary
/// - `404 Not Found` for an unknown importer
/// - `409 Conflict` if the importer is already running
/// - `502 Bad Gateway` if the source could not be fetched
/// - `500 Internal Server Error` for storage failures
#[instrument(skip(state))]
pub async fn run_importer(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    let Some(slot) = state.importers.get(&name) else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            ImportError::UnknownImporter(name).to_string(),
        ));
    };

    let Ok(_guard) = slot.running.try_lock() else {
        warn!(importer = %name, "Run requested while already running");
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("importer '{name}' is already running"),
        ));
    };

    match state.reconciler.run(slot.adapter.as_ref()).await {
        Ok(summary) => {
            info!(
                importer = %name,
                created = summary.created,
                failed = summary.failed,
                "Run finished"
            );
            Ok(Json(summary))
        }
        Err(e) => {
            warn!(importer = %name, error = %e, "Run failed");
            Err(api_error(status_for(&e), e.to_string()))
        }
    }
}

/// GET /importers/:name/records - List import records.
///
/// # Query Parameters
///
/// - `status` (optional): one of `pending`, `success`, `error`, `duplicate`
#[instrument(skip(state))]
pub async fn list_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<Vec<ImportRecord>>, ApiError> {
    if !state.importers.contains_key(&name) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            ImportError::UnknownImporter(name).to_string(),
        ));
    }

    let status = match query.status.as_deref() {
        Some(status) => Some(ImportStatus::parse(status).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("unknown status '{status}'"))
        })?),
        None => None,
    };

    match state.reconciler.storage().list_records(&name, status).await {
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            warn!(importer = %name, error = %e, "Failed to list records");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list records"))
        }
    }
}

/// Status code for a run-level failure.
fn status_for(error: &ImportError) -> StatusCode {
    match error {
        ImportError::Http { .. }
        | ImportError::Transport { .. }
        | ImportError::Decode { .. }
        | ImportError::Auth { .. } => StatusCode::BAD_GATEWAY,
        ImportError::UnknownImporter(_) => StatusCode::NOT_FOUND,
        ImportError::Config(_) | ImportError::Taxonomy(_) | ImportError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failures_are_bad_gateway() {
        let http = ImportError::Http {
            importer: "echo".to_string(),
            status: 500,
            message: "down".to_string(),
        };
        let auth = ImportError::Auth {
            importer: "workday".to_string(),
            message: "invalid_grant".to_string(),
        };
        assert_eq!(status_for(&http), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&auth), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&ImportError::Config("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
