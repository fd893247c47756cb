use super::record_error;
use crate::dtos::CompanyRequest;
use crate::middleware::TenantContext;
use crate::models::UpsertCompany;
use crate::startup::AppState;
use crate::utils::ValidatedJson;
use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

pub async fn get_company(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, AppError> {
    let company = state
        .db
        .require_company(tenant.company_id)
        .await
        .inspect_err(record_error)?;
    Ok(Json(company))
}

pub async fn upsert_company(
    State(state): State<AppState>,
    tenant: TenantContext,
    ValidatedJson(req): ValidatedJson<CompanyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let company = state
        .db
        .upsert_company(tenant.company_id, &UpsertCompany::from(req))
        .await
        .inspect_err(record_error)?;
    Ok(Json(company))
}
