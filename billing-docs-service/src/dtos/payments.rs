use crate::models::{CreatePayment, InvoiceStatus, Payment, PaymentOutcome};
use crate::utils::validation::validate_amount;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,

    #[validate(length(min = 1, max = 50, message = "Payment method is required"))]
    pub method: String,

    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,

    #[validate(length(max = 255))]
    pub reference: Option<String>,
}

impl From<PaymentRequest> for CreatePayment {
    fn from(req: PaymentRequest) -> Self {
        Self {
            amount: req.amount,
            method: req.method.trim().to_lowercase(),
            payment_date: req.payment_date,
            reference: req.reference,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment: Payment,
    pub invoice_status: InvoiceStatus,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
}

impl From<PaymentOutcome> for PaymentResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        Self {
            payment: outcome.payment,
            invoice_status: outcome.invoice_status,
            amount_paid: outcome.amount_paid,
            balance_due: outcome.balance_due,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponse {
    pub payments: Vec<Payment>,
    pub total_paid: Decimal,
}

impl From<Vec<Payment>> for PaymentListResponse {
    fn from(payments: Vec<Payment>) -> Self {
        let total_paid = payments.iter().map(|p| p.amount).sum();
        Self {
            payments,
            total_paid,
        }
    }
}
