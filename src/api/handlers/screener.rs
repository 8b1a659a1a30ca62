use axum::Json;
use axum::extract::{Path, State};
use serde_json::Value;

use crate::analytics::metadata;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::TableSummary;

fn records(state: &AppState, table: &str) -> Result<Json<Value>, ApiError> {
    match state.inner.store.records(table) {
        Some(Ok(value)) => Ok(Json(value)),
        Some(Err(e)) => Err(ApiError::Internal(format!("serialising {table}: {e}"))),
        None => Err(ApiError::NotFound(format!("no table named '{table}'"))),
    }
}

pub async fn list_tables(State(state): State<AppState>) -> Json<Vec<TableSummary>> {
    let tables = state
        .inner
        .store
        .row_counts()
        .into_iter()
        .map(|(name, rows)| TableSummary { name, rows })
        .collect();
    Json(tables)
}

pub async fn get_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<Value>, ApiError> {
    records(&state, &table)
}

pub async fn get_metadata(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    records(&state, metadata::TABLE)
}
