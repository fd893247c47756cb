//! Payment model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::InvoiceStatus;

/// Payment applied to an invoice.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub company_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub amount: Decimal,
    pub method: String,
    pub payment_date: Option<NaiveDate>,
    pub reference: Option<String>,
}

/// Result of a registered payment with the invoice position after it.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub invoice_status: InvoiceStatus,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
}
