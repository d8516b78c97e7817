//! Connection route handlers
//!
//! Endpoint checks that run before a migration is started.

use crate::connection::{connect_destination, connect_source, test_connection as run_connection_test, ConnectionTestResult};
use crate::error::{validation_error, ApiResult};
use crate::migration::compare::{compare_schemas, ComparisonReport};
use crate::models::{CompareRequest, EndpointRequest, ListTablesRequest, SuccessResponse, TableListResponse};
use crate::state::SharedState;
use axum::{extract::State, Json};
use tracing::{debug, info};
use validator::Validate;

/// Test one endpoint without starting a run
pub async fn test_connection(
    State(state): State<SharedState>,
    Json(payload): Json<EndpointRequest>,
) -> ApiResult<Json<SuccessResponse<ConnectionTestResult>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let endpoint = payload.to_endpoint(&state.settings)?;
    debug!("Testing connection to {}", endpoint.label());

    let result = run_connection_test(&endpoint, &state.settings).await?;
    info!("Connection test to {} took {}ms", endpoint.label(), result.latency_ms);

    Ok(Json(SuccessResponse::with_data(
        "Connection test successful.".to_string(),
        result,
    )))
}

/// List the tables of a source schema as `schema.table` names
pub async fn list_tables(
    State(state): State<SharedState>,
    Json(payload): Json<ListTablesRequest>,
) -> ApiResult<Json<SuccessResponse<TableListResponse>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let endpoint = payload.source.to_endpoint(&state.settings)?;
    let source = connect_source(&endpoint, &state.settings).await?;
    let tables: Vec<String> = source
        .list_tables(&endpoint.schema)
        .await?
        .into_iter()
        .map(|t| format!("{}.{}", endpoint.schema, t))
        .collect();

    Ok(Json(SuccessResponse::with_data(
        format!("{} table(s) in {}.", tables.len(), endpoint.schema),
        TableListResponse {
            schema: endpoint.schema,
            tables,
        },
    )))
}

/// Compare a source schema with a destination schema
pub async fn compare(
    State(state): State<SharedState>,
    Json(payload): Json<CompareRequest>,
) -> ApiResult<Json<SuccessResponse<ComparisonReport>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let source_endpoint = payload.source.to_endpoint(&state.settings)?;
    let dest_endpoint = payload.destination.to_endpoint(&state.settings)?;
    let (source, dest) = futures::try_join!(
        connect_source(&source_endpoint, &state.settings),
        connect_destination(&dest_endpoint, &state.settings),
    )?;

    let report = compare_schemas(
        source.as_introspector(),
        &*dest,
        &source_endpoint.schema,
        &dest_endpoint.schema,
    )
    .await?;

    let identical = report.tables.iter().filter(|t| t.identical).count();
    info!(
        "Compared {} with {}: {}/{} table(s) identical",
        source_endpoint.schema,
        dest_endpoint.schema,
        identical,
        report.tables.len()
    );

    Ok(Json(SuccessResponse::with_data(
        format!("{} of {} shared table(s) identical.", identical, report.tables.len()),
        report,
    )))
}
