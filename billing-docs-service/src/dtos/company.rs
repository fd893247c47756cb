use crate::models::{DocumentType, SeriesCounter, UpsertCompany};
use crate::utils::validation::{validate_currency, validate_percentage, validate_series};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CompanyRequest {
    #[validate(length(min = 1, max = 255, message = "Company name is required"))]
    pub name: String,

    /// Receives "document signed" notifications.
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(custom(function = "validate_percentage"))]
    pub tax_rate: Decimal,

    #[validate(custom(function = "validate_currency"))]
    pub currency: String,

    #[validate(custom(function = "validate_series"))]
    pub invoice_series: String,

    #[validate(custom(function = "validate_series"))]
    pub quote_series: String,
}

impl From<CompanyRequest> for UpsertCompany {
    fn from(req: CompanyRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            tax_rate: req.tax_rate,
            currency: req.currency.to_uppercase(),
            invoice_series: req.invoice_series,
            quote_series: req.quote_series,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfigureSeriesRequest {
    #[serde(default = "default_active")]
    pub active: bool,

    /// Next number to hand out. Can only move the counter forward.
    #[validate(range(min = 1))]
    pub starting_number: Option<i64>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub document_type: DocumentType,
    pub series: String,
    pub last_number: i64,
    pub next_number: i64,
    pub active: bool,
    pub updated_utc: DateTime<Utc>,
}

impl From<SeriesCounter> for SeriesResponse {
    fn from(counter: SeriesCounter) -> Self {
        Self {
            next_number: counter.next_number(),
            document_type: counter.document_type,
            series: counter.series,
            last_number: counter.last_number,
            active: counter.active,
            updated_utc: counter.updated_utc,
        }
    }
}
