//! Domain models for billing-docs-service.

mod company;
mod document;
mod line_item;
mod payment;
mod series;
mod signature;

pub use company::{Company, UpsertCompany};
pub use document::{
    display_number, Document, DocumentDraft, DocumentRef, DocumentType, DocumentWithLines,
    Invoice, InvoiceStatus, LineDraft, Quote, QuoteStatus, UnknownStatus,
};
pub use line_item::LineItem;
pub use payment::{CreatePayment, Payment, PaymentOutcome};
pub use series::SeriesCounter;
pub use signature::{
    Signature, SignatureRequest, SignatureStatus, SignerContext, SigningState, SubmitSignature,
};
