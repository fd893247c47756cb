//! Invoice and quote models with their status state machines.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use super::LineItem;

/// Raised when a status column holds a value outside the closed set.
#[derive(Debug, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Kind of billing document. Each kind has its own numbering series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Quote,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Quote => "quote",
        }
    }

    pub(crate) fn lines_table(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice_lines",
            DocumentType::Quote => "quote_lines",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DocumentType {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "invoice" => Ok(DocumentType::Invoice),
            "quote" => Ok(DocumentType::Quote),
            _ => Err(UnknownStatus {
                kind: "document type",
                value,
            }),
        }
    }
}

/// Reference to one persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_type: DocumentType,
    pub document_id: Uuid,
}

/// Human-facing document number, e.g. `INV-00000042`.
pub fn display_number(series: &str, number: i64) -> String {
    format!("{}-{:08}", series, number)
}

/// Invoice status.
///
/// `overdue` is never stored; see [`Invoice::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Issued, InvoiceStatus::Paid) | (InvoiceStatus::Issued, InvoiceStatus::Void)
        )
    }

    pub fn transition_to(self, next: InvoiceStatus) -> Result<InvoiceStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::invalid_state(
                format!("Invoice cannot move from {} to {}", self.as_str(), next.as_str()),
                self.as_str(),
            ))
        }
    }

    /// Lines and header fields may only change while the invoice is issued.
    pub fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Issued)
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "issued" => Ok(InvoiceStatus::Issued),
            "paid" => Ok(InvoiceStatus::Paid),
            "void" => Ok(InvoiceStatus::Void),
            _ => Err(UnknownStatus {
                kind: "invoice",
                value,
            }),
        }
    }
}

/// Quote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Invoiced,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Approved => "approved",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Invoiced => "invoiced",
        }
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Pending)
                | (Rejected, Pending)
                | (Pending, Invoiced)
                | (Approved, Invoiced)
                | (Pending, Expired)
                | (Approved, Expired)
        )
    }

    pub fn transition_to(self, next: QuoteStatus) -> Result<QuoteStatus, AppError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::invalid_state(
                format!("Quote cannot move from {} to {}", self.as_str(), next.as_str()),
                self.as_str(),
            ))
        }
    }

    /// Invoiced quotes are frozen.
    pub fn is_editable(&self) -> bool {
        !matches!(self, QuoteStatus::Invoiced)
    }
}

impl TryFrom<String> for QuoteStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(QuoteStatus::Pending),
            "approved" => Ok(QuoteStatus::Approved),
            "rejected" => Ok(QuoteStatus::Rejected),
            "expired" => Ok(QuoteStatus::Expired),
            "invoiced" => Ok(QuoteStatus::Invoiced),
            _ => Err(UnknownStatus {
                kind: "quote",
                value,
            }),
        }
    }
}

/// Invoice header row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub series: String,
    pub number: i64,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub quote_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub voided_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn display_number(&self) -> String {
        display_number(&self.series, self.number)
    }

    pub fn balance_due(&self) -> Decimal {
        self.total - self.amount_paid
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == InvoiceStatus::Issued && self.due_date.is_some_and(|due| due < today)
    }

    /// Stored status, or `overdue` for an issued invoice past its due date.
    pub fn effective_status(&self, today: NaiveDate) -> &'static str {
        if self.is_overdue(today) {
            "overdue"
        } else {
            self.status.as_str()
        }
    }
}

/// Quote header row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Quote {
    pub quote_id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub series: String,
    pub number: i64,
    pub issue_date: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub currency: String,
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    #[sqlx(try_from = "String")]
    pub status: QuoteStatus,
    pub invoice_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Quote {
    pub fn display_number(&self) -> String {
        display_number(&self.series, self.number)
    }

    /// Pending or approved quotes whose validity date has passed read as expired.
    pub fn effective_status(&self, today: NaiveDate) -> QuoteStatus {
        match self.status {
            QuoteStatus::Pending | QuoteStatus::Approved
                if self.valid_until.is_some_and(|until| until < today) =>
            {
                QuoteStatus::Expired
            }
            status => status,
        }
    }

    /// Fails unless the quote can become an invoice today.
    pub fn ensure_convertible(&self, today: NaiveDate) -> Result<(), AppError> {
        let current = self.effective_status(today);
        if current == QuoteStatus::Expired {
            return Err(AppError::invalid_state(
                "Quote has expired and cannot be converted",
                current.as_str(),
            ));
        }
        if !current.can_transition_to(QuoteStatus::Invoiced) {
            return Err(AppError::invalid_state(
                format!("Quote cannot be converted while {}", current.as_str()),
                current.as_str(),
            ));
        }
        Ok(())
    }
}

/// Either kind of document header.
#[derive(Debug, Clone)]
pub enum Document {
    Invoice(Invoice),
    Quote(Quote),
}

impl Document {
    pub fn id(&self) -> Uuid {
        match self {
            Document::Invoice(i) => i.invoice_id,
            Document::Quote(q) => q.quote_id,
        }
    }

    pub fn company_id(&self) -> Uuid {
        match self {
            Document::Invoice(i) => i.company_id,
            Document::Quote(q) => q.company_id,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            Document::Invoice(_) => DocumentType::Invoice,
            Document::Quote(_) => DocumentType::Quote,
        }
    }

    pub fn display_number(&self) -> String {
        match self {
            Document::Invoice(i) => i.display_number(),
            Document::Quote(q) => q.display_number(),
        }
    }

    pub fn total(&self) -> Decimal {
        match self {
            Document::Invoice(i) => i.total,
            Document::Quote(q) => q.total,
        }
    }

    pub fn effective_status(&self, today: NaiveDate) -> &'static str {
        match self {
            Document::Invoice(i) => i.effective_status(today),
            Document::Quote(q) => q.effective_status(today).as_str(),
        }
    }
}

/// Document header together with its ordered lines.
#[derive(Debug, Clone)]
pub struct DocumentWithLines {
    pub document: Document,
    pub lines: Vec<LineItem>,
}

/// Line as submitted by a caller, before totals are computed.
#[derive(Debug, Clone)]
pub struct LineDraft {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

/// Input for creating or editing a document.
///
/// `terms_date` is the due date of an invoice or the validity date of a quote.
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub client_id: Uuid,
    pub series: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub terms_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
    pub lines: Vec<LineDraft>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quote(status: QuoteStatus, valid_until: Option<NaiveDate>) -> Quote {
        Quote {
            quote_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            series: "QUO".to_string(),
            number: 7,
            issue_date: date(2026, 1, 1),
            valid_until,
            currency: "EUR".to_string(),
            tax_rate: dec!(21),
            subtotal: dec!(100),
            discount: dec!(0),
            tax: dec!(21),
            total: dec!(121),
            status,
            invoice_id: None,
            notes: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn invoice(status: InvoiceStatus, due_date: Option<NaiveDate>) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            series: "INV".to_string(),
            number: 42,
            issue_date: date(2026, 1, 1),
            due_date,
            currency: "EUR".to_string(),
            tax_rate: dec!(21),
            subtotal: dec!(100),
            discount: dec!(0),
            tax: dec!(21),
            total: dec!(121),
            amount_paid: dec!(21),
            status,
            quote_id: None,
            notes: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
            voided_utc: None,
        }
    }

    #[test]
    fn invoice_transition_table() {
        use InvoiceStatus::*;
        assert!(Issued.can_transition_to(Paid));
        assert!(Issued.can_transition_to(Void));
        assert!(!Paid.can_transition_to(Void));
        assert!(!Void.can_transition_to(Issued));
        assert!(!Void.can_transition_to(Paid));

        let err = Void.transition_to(Paid).unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[test]
    fn quote_transition_table() {
        use QuoteStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Pending));
        assert!(Rejected.can_transition_to(Pending));
        assert!(Approved.can_transition_to(Invoiced));
        assert!(!Rejected.can_transition_to(Invoiced));
        assert!(!Invoiced.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Invoiced));
        assert!(!Invoiced.is_editable());
        assert!(Expired.is_editable());
    }

    #[test]
    fn overdue_is_derived_from_due_date() {
        let today = date(2026, 3, 10);
        assert_eq!(
            invoice(InvoiceStatus::Issued, Some(date(2026, 3, 9))).effective_status(today),
            "overdue"
        );
        assert_eq!(
            invoice(InvoiceStatus::Issued, Some(date(2026, 3, 10))).effective_status(today),
            "issued"
        );
        assert_eq!(
            invoice(InvoiceStatus::Paid, Some(date(2026, 1, 1))).effective_status(today),
            "paid"
        );
        assert_eq!(invoice(InvoiceStatus::Issued, None).balance_due(), dec!(100));
    }

    #[test]
    fn quote_expiry_is_derived_from_validity() {
        let today = date(2026, 3, 10);
        let lapsed = quote(QuoteStatus::Approved, Some(date(2026, 3, 1)));
        assert_eq!(lapsed.effective_status(today), QuoteStatus::Expired);

        let rejected = quote(QuoteStatus::Rejected, Some(date(2026, 3, 1)));
        assert_eq!(rejected.effective_status(today), QuoteStatus::Rejected);
    }

    #[test]
    fn only_live_quotes_convert() {
        let today = date(2026, 3, 10);
        assert!(quote(QuoteStatus::Pending, None).ensure_convertible(today).is_ok());
        assert!(quote(QuoteStatus::Approved, Some(today)).ensure_convertible(today).is_ok());

        for q in [
            quote(QuoteStatus::Invoiced, None),
            quote(QuoteStatus::Rejected, None),
            quote(QuoteStatus::Pending, Some(date(2026, 3, 9))),
        ] {
            let err = q.ensure_convertible(today).unwrap_err();
            assert_eq!(err.code(), "invalid_state");
        }
    }

    #[test]
    fn display_number_is_zero_padded() {
        assert_eq!(display_number("INV", 42), "INV-00000042");
        assert_eq!(display_number("Q2026", 123456789), "Q2026-123456789");
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(InvoiceStatus::try_from("overdue".to_string()).is_err());
        assert_eq!(
            QuoteStatus::try_from("invoiced".to_string()).unwrap(),
            QuoteStatus::Invoiced
        );
    }
}
