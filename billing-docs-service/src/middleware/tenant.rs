//! Tenant context extractor.
//!
//! The company id arrives pre-authenticated in `x-tenant-id` from the gateway in
//! front of this service. Every tenant-scoped query filters on it.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Company (tenant) making the request, plus the acting user when known.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub company_id: Uuid,
    pub user_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!("Missing {} header", TENANT_ID_HEADER))
            })?;

        let company_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::AuthError(anyhow::anyhow!("Invalid {} header", TENANT_ID_HEADER))
        })?;

        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty());

        let span = tracing::Span::current();
        span.record("company_id", tracing::field::display(company_id));
        if let Some(user_id) = &user_id {
            span.record("user_id", user_id.as_str());
        }

        Ok(TenantContext {
            company_id,
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<TenantContext, AppError> {
        let (mut parts, _) = request.into_parts();
        TenantContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_company_and_user() {
        let company_id = Uuid::new_v4();
        let request = Request::builder()
            .header(TENANT_ID_HEADER, company_id.to_string())
            .header(USER_ID_HEADER, "user-7")
            .body(())
            .unwrap();

        let tenant = extract(request).await.unwrap();
        assert_eq!(tenant.company_id, company_id);
        assert_eq!(tenant.user_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn missing_or_malformed_tenant_is_unauthorized() {
        let missing = Request::builder().body(()).unwrap();
        assert_eq!(extract(missing).await.unwrap_err().code(), "unauthorized");

        let malformed = Request::builder()
            .header(TENANT_ID_HEADER, "acme")
            .body(())
            .unwrap();
        assert_eq!(extract(malformed).await.unwrap_err().code(), "unauthorized");
    }
}
