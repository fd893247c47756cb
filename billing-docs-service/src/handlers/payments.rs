use super::record_error;
use crate::dtos::{DocumentResponse, PaymentListResponse, PaymentRequest, PaymentResponse};
use crate::middleware::TenantContext;
use crate::services::documents::today;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn register_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .documents
        .register_payment(tenant.company_id, invoice_id, req.into())
        .await
        .inspect_err(record_error)?;

    Ok((StatusCode::CREATED, Json(PaymentResponse::from(outcome))))
}

pub async fn list_payments(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payments = state
        .documents
        .list_payments(tenant.company_id, invoice_id)
        .await
        .inspect_err(record_error)?;

    Ok(Json(PaymentListResponse::from(payments)))
}

pub async fn void_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let invoice = state
        .documents
        .void_invoice(tenant.company_id, invoice_id)
        .await
        .inspect_err(record_error)?;

    Ok(Json(DocumentResponse::new(invoice, today())))
}
