use super::record_error;
use crate::dtos::{
    SignatureReceiptResponse, SignatureRequestBody, SignatureRequestResponse,
    SignatureRequestSummary, SignatureStatusResponse, SigningViewResponse, SubmitSignatureBody,
};
use crate::middleware::TenantContext;
use crate::models::SignerContext;
use crate::services::documents::today;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

pub async fn request_signature(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<SignatureRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let document = req.document_ref();
    let created = state
        .signatures
        .request_signature(
            tenant.company_id,
            document,
            req.signer_email,
            req.signer_name,
        )
        .await
        .inspect_err(record_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SignatureRequestResponse::from(created)),
    ))
}

pub async fn validate_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .signatures
        .validate_token(&token)
        .await
        .inspect_err(record_error)?;

    Ok(Json(SigningViewResponse::new(view, today())))
}

pub async fn submit_signature(
    State(state): State<AppState>,
    signer: SignerContext,
    ValidatedJson(req): ValidatedJson<SubmitSignatureBody>,
) -> Result<impl IntoResponse, AppError> {
    let token = req.token.clone();
    let receipt = state
        .signatures
        .submit_signature(&token, req.into(), signer)
        .await
        .inspect_err(record_error)?;

    Ok(Json(SignatureReceiptResponse::from(receipt)))
}

pub async fn signature_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .signatures
        .signature_status(&token)
        .await
        .inspect_err(record_error)?;

    Ok(Json(SignatureStatusResponse::from(report)))
}

pub async fn cancel_signature(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let cancelled = state
        .signatures
        .cancel_signature(tenant.company_id, request_id)
        .await
        .inspect_err(record_error)?;

    Ok(Json(SignatureRequestSummary::new(cancelled, Utc::now())))
}
