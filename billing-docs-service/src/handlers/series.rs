use super::record_error;
use crate::dtos::{ConfigureSeriesRequest, SeriesResponse};
use crate::middleware::TenantContext;
use crate::models::DocumentType;
use crate::startup::AppState;
use crate::utils::validation::validate_series;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

pub async fn list_series(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let counters = state
        .allocator
        .list_series(tenant.company_id)
        .await
        .inspect_err(record_error)?;
    Ok(Json(
        counters
            .into_iter()
            .map(SeriesResponse::from)
            .collect::<Vec<_>>(),
    ))
}

pub async fn configure_series(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((document_type, series)): Path<(DocumentType, String)>,
    ValidatedJson(req): ValidatedJson<ConfigureSeriesRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_series(&series).map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!(
            "Invalid series '{}': {}",
            series,
            e.message.unwrap_or_default()
        ))
    })?;

    let counter = state
        .allocator
        .configure_series(
            tenant.company_id,
            document_type,
            &series,
            req.active,
            req.starting_number,
        )
        .await
        .inspect_err(record_error)?;
    Ok(Json(SeriesResponse::from(counter)))
}
