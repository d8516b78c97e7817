//! Migration run route handlers

use crate::error::{conflict_error, not_found_error, validation_error, ApiResult};
use crate::migration::report::{MigrationReport, RunSummary};
use crate::migration::CancelOutcome;
use crate::models::{StartMigrationRequest, StartMigrationResponse, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Start a run in the background
pub async fn start_migration(
    State(state): State<SharedState>,
    Json(payload): Json<StartMigrationRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<StartMigrationResponse>>)> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let config = payload.into_config(&state.settings)?;
    info!(
        "Starting migration {} -> {} ({} table(s) requested)",
        config.source.label(),
        config.destination.label(),
        config.tables.len()
    );

    let run_id = state.runs.start(config).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(SuccessResponse::with_data(
            "Migration started.",
            StartMigrationResponse {
                run_id,
                status_url: format!("/api/migrations/{}", run_id),
            },
        )),
    ))
}

/// List retained runs, newest first
pub async fn list_migrations(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<Vec<RunSummary>>>> {
    let runs = state.runs.list().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} run(s).", runs.len()),
        runs,
    )))
}

/// Current report of one run
pub async fn get_migration(
    State(state): State<SharedState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<MigrationReport>>> {
    let report = state
        .runs
        .snapshot(run_id)
        .await
        .ok_or_else(|| not_found_error(format!("Migration run {} not found", run_id)))?;

    Ok(Json(SuccessResponse::with_data(
        format!("Migration run is {}.", report.status),
        report,
    )))
}

/// Ask a run to stop before its next table
pub async fn cancel_migration(
    State(state): State<SharedState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<()>>> {
    match state.runs.cancel(run_id).await {
        CancelOutcome::Requested => Ok(Json(SuccessResponse::<()>::message_only(
            "Cancellation requested. The run stops before its next table.",
        ))),
        CancelOutcome::AlreadyFinished => Err(conflict_error(format!("Migration run {} has already finished", run_id))),
        CancelOutcome::NotFound => Err(not_found_error(format!("Migration run {} not found", run_id))),
    }
}
