//! Tenant (company) settings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::DocumentType;

/// Per-company billing defaults.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Company {
    pub company_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub tax_rate: Decimal,
    pub currency: String,
    pub invoice_series: String,
    pub quote_series: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Company {
    pub fn default_series(&self, document_type: DocumentType) -> &str {
        match document_type {
            DocumentType::Invoice => &self.invoice_series,
            DocumentType::Quote => &self.quote_series,
        }
    }
}

/// Input for creating or replacing company settings.
#[derive(Debug, Clone)]
pub struct UpsertCompany {
    pub name: String,
    pub email: Option<String>,
    pub tax_rate: Decimal,
    pub currency: String,
    pub invoice_series: String,
    pub quote_series: String,
}
