use crate::models::{
    Document, DocumentDraft, DocumentType, DocumentWithLines, LineDraft, LineItem, QuoteStatus,
};
use crate::utils::validation::{
    validate_currency, validate_discount, validate_line_value, validate_not_nil, validate_series,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineRequest {
    #[validate(length(min = 1, max = 1000, message = "Description is required"))]
    pub description: String,

    #[validate(custom(function = "validate_line_value"))]
    pub quantity: Decimal,

    #[validate(custom(function = "validate_line_value"))]
    pub unit_price: Decimal,

    #[serde(default)]
    #[validate(custom(function = "validate_discount"))]
    pub discount: Decimal,
}

impl From<LineRequest> for LineDraft {
    fn from(line: LineRequest) -> Self {
        Self {
            description: line.description,
            quantity: line.quantity,
            unit_price: line.unit_price,
            discount: line.discount,
        }
    }
}

/// Body for creating or editing an invoice or quote.
///
/// `due_date` applies to invoices and `valid_until` to quotes; the other one is ignored.
#[derive(Debug, Deserialize, Validate)]
pub struct DocumentRequest {
    #[validate(custom(function = "validate_not_nil"))]
    pub client_id: Uuid,

    #[validate(custom(function = "validate_series"))]
    pub series: Option<String>,

    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,

    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,

    /// Percentage; range is checked once the company default is resolved.
    pub tax_rate: Option<Decimal>,

    #[validate(length(max = 5000))]
    pub notes: Option<String>,

    #[validate(length(min = 1, max = 500, message = "At least one line is required"), nested)]
    pub lines: Vec<LineRequest>,
}

impl DocumentRequest {
    pub fn into_draft(self, document_type: DocumentType) -> DocumentDraft {
        let terms_date = match document_type {
            DocumentType::Invoice => self.due_date,
            DocumentType::Quote => self.valid_until,
        };
        DocumentDraft {
            client_id: self.client_id,
            series: self.series,
            issue_date: self.issue_date,
            terms_date,
            currency: self.currency,
            tax_rate: self.tax_rate,
            notes: self.notes,
            lines: self.lines.into_iter().map(LineDraft::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub document_type: DocumentType,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub series: String,
    pub number: i64,
    pub display_number: String,
    /// Derived status: `overdue` and `expired` are reported from dates.
    pub status: String,
    pub issue_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    pub currency: String,
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_due: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub lines: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl DocumentResponse {
    pub fn new(document: DocumentWithLines, today: NaiveDate) -> Self {
        let status = document.document.effective_status(today).to_string();
        let display_number = document.document.display_number();
        match document.document {
            Document::Invoice(invoice) => Self {
                id: invoice.invoice_id,
                document_type: DocumentType::Invoice,
                company_id: invoice.company_id,
                client_id: invoice.client_id,
                display_number,
                status,
                issue_date: invoice.issue_date,
                due_date: invoice.due_date,
                valid_until: None,
                currency: invoice.currency,
                tax_rate: invoice.tax_rate,
                subtotal: invoice.subtotal,
                discount: invoice.discount,
                tax: invoice.tax,
                total: invoice.total,
                amount_paid: Some(invoice.amount_paid),
                balance_due: Some(invoice.total - invoice.amount_paid),
                quote_id: invoice.quote_id,
                invoice_id: None,
                notes: invoice.notes,
                series: invoice.series,
                number: invoice.number,
                lines: document.lines,
                created_utc: invoice.created_utc,
                updated_utc: invoice.updated_utc,
            },
            Document::Quote(quote) => Self {
                id: quote.quote_id,
                document_type: DocumentType::Quote,
                company_id: quote.company_id,
                client_id: quote.client_id,
                display_number,
                status,
                issue_date: quote.issue_date,
                due_date: None,
                valid_until: quote.valid_until,
                currency: quote.currency,
                tax_rate: quote.tax_rate,
                subtotal: quote.subtotal,
                discount: quote.discount,
                tax: quote.tax,
                total: quote.total,
                amount_paid: None,
                balance_due: None,
                quote_id: None,
                invoice_id: quote.invoice_id,
                notes: quote.notes,
                series: quote.series,
                number: quote.number,
                lines: document.lines,
                created_utc: quote.created_utc,
                updated_utc: quote.updated_utc,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteStatusRequest {
    pub status: QuoteStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_json() -> serde_json::Value {
        json!({
            "client_id": Uuid::new_v4(),
            "due_date": "2026-02-01",
            "valid_until": "2026-03-01",
            "lines": [
                { "description": "Consulting", "quantity": "2", "unit_price": "100.00" }
            ]
        })
    }

    #[test]
    fn terms_date_follows_document_type() {
        let request: DocumentRequest = serde_json::from_value(request_json()).unwrap();
        assert!(request.validate().is_ok());
        let draft = request.into_draft(DocumentType::Invoice);
        assert_eq!(draft.terms_date, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(draft.lines[0].discount, Decimal::ZERO);

        let request: DocumentRequest = serde_json::from_value(request_json()).unwrap();
        let draft = request.into_draft(DocumentType::Quote);
        assert_eq!(draft.terms_date, NaiveDate::from_ymd_opt(2026, 3, 1));
    }

    #[test]
    fn empty_and_invalid_lines_fail_validation() {
        let mut body = request_json();
        body["lines"] = json!([]);
        let request: DocumentRequest = serde_json::from_value(body).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("lines"));

        let mut body = request_json();
        body["lines"][0]["quantity"] = json!("0");
        let request: DocumentRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_err());

        let mut body = request_json();
        body["client_id"] = json!(Uuid::nil());
        let request: DocumentRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn oversized_line_discount_fails_nested_validation() {
        let mut body = request_json();
        body["lines"][0]["discount"] = json!("50000000000000000000000000000");
        let request: DocumentRequest = serde_json::from_value(body).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("lines"));

        let line = serde_json::to_value(&request.lines[0]).unwrap();
        assert_eq!(line["description"], "Consulting");
    }
}
