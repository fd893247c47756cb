use super::record_error;
use crate::dtos::{DocumentRequest, DocumentResponse, SignatureRequestSummary};
use crate::middleware::TenantContext;
use crate::models::{DocumentRef, DocumentType};
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

pub async fn create_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(document_type): Path<DocumentType>,
    ValidatedJson(req): ValidatedJson<DocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .documents
        .create_document(
            tenant.company_id,
            document_type,
            req.into_draft(document_type),
        )
        .await
        .inspect_err(record_error)?;

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse::new(created, today())),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((document_type, document_id)): Path<(DocumentType, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let document = state
        .documents
        .get_document(tenant.company_id, document_type, document_id)
        .await
        .inspect_err(record_error)?;

    Ok(Json(DocumentResponse::new(document, today())))
}

pub async fn update_document(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((document_type, document_id)): Path<(DocumentType, Uuid)>,
    ValidatedJson(req): ValidatedJson<DocumentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .documents
        .update_document(
            tenant.company_id,
            document_type,
            document_id,
            req.into_draft(document_type),
        )
        .await
        .inspect_err(record_error)?;

    Ok(Json(DocumentResponse::new(updated, today())))
}

pub async fn list_document_signatures(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((document_type, document_id)): Path<(DocumentType, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let requests = state
        .signatures
        .list_signature_requests(
            tenant.company_id,
            DocumentRef {
                document_type,
                document_id,
            },
        )
        .await
        .inspect_err(record_error)?;

    let now = Utc::now();
    Ok(Json(
        requests
            .into_iter()
            .map(|r| SignatureRequestSummary::new(r, now))
            .collect::<Vec<_>>(),
    ))
}
