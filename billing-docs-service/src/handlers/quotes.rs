use super::record_error;
use crate::dtos::{DocumentResponse, QuoteStatusRequest};
use crate::middleware::TenantContext;
use crate::services::documents::today;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn convert_quote(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(quote_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .documents
        .convert_quote_to_invoice(tenant.company_id, quote_id)
        .await
        .inspect_err(record_error)?;

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse::new(invoice, today())),
    ))
}

pub async fn change_quote_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<QuoteStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let quote = state
        .documents
        .change_quote_status(tenant.company_id, quote_id, req.status)
        .await
        .inspect_err(record_error)?;

    Ok(Json(DocumentResponse::new(quote, today())))
}

pub async fn delete_quote(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(quote_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .documents
        .delete_quote(tenant.company_id, quote_id)
        .await
        .inspect_err(record_error)?;

    Ok(StatusCode::NO_CONTENT)
}
