//! Invoice and quote lifecycle: creation, edits, conversion, payments.
//!
//! Totals always come from the calculator. Numbers always come from the
//! allocator, outside the transaction that writes the document.

use crate::models::{
    CreatePayment, Document, DocumentDraft, DocumentRef, DocumentType, DocumentWithLines, Invoice,
    InvoiceStatus, LineDraft, LineItem, Payment, PaymentOutcome, Quote, QuoteStatus,
};
use crate::services::calculator::{self, Computation, LineAmounts, LineInput, Totals};
use crate::services::database::{classify_db_error, db_error, violates_constraint, Database};
use crate::services::metrics::{
    ALLOCATION_CONFLICTS_TOTAL, DB_QUERY_DURATION, DOCUMENTS_CREATED_TOTAL, PAYMENTS_TOTAL,
};
use crate::services::sequence::SequenceAllocator;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::{PgConnection, PgExecutor, PgPool};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

/// Allocation attempts before a number collision is surfaced as `Conflict`.
const MAX_ALLOCATION_ATTEMPTS: u32 = 3;

const INVOICE_NUMBER_KEY: &str = "invoices_company_series_number_key";
const QUOTE_NUMBER_KEY: &str = "quotes_company_series_number_key";

const INVOICE_COLUMNS: &str = "invoice_id, company_id, client_id, series, number, issue_date, \
    due_date, currency, tax_rate, subtotal, discount, tax, total, amount_paid, status, quote_id, \
    notes, created_utc, updated_utc, voided_utc";

const QUOTE_COLUMNS: &str = "quote_id, company_id, client_id, series, number, issue_date, \
    valid_until, currency, tax_rate, subtotal, discount, tax, total, status, invoice_id, notes, \
    created_utc, updated_utc";

const LINE_COLUMNS: &str =
    "line_id, document_id, position, description, quantity, unit_price, discount, subtotal, tax, total";

const PAYMENT_COLUMNS: &str =
    "payment_id, company_id, invoice_id, amount, method, payment_date, reference, created_utc";

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn field_error(field: &'static str, code: &'static str, message: &'static str) -> AppError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    AppError::ValidationError(errors)
}

/// Tax rate is a percentage in [0, 100] with at most four decimals.
pub fn validate_tax_rate(rate: Decimal) -> Result<(), AppError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED || rate.normalize().scale() > 4 {
        return Err(field_error(
            "tax_rate",
            "tax_rate",
            "tax rate must be between 0 and 100 with at most 4 decimals",
        ));
    }
    Ok(())
}

/// Line amounts must fit the money columns before anything is computed or numbered.
fn validate_line_amounts(lines: &[LineInput]) -> Result<(), AppError> {
    if !calculator::within_bounds(lines) {
        return Err(field_error(
            "lines",
            "too_large",
            "line amounts exceed the largest supported document total",
        ));
    }
    Ok(())
}

fn validate_terms_date(
    document_type: DocumentType,
    issue_date: NaiveDate,
    terms_date: Option<NaiveDate>,
) -> Result<(), AppError> {
    match (document_type, terms_date) {
        (DocumentType::Invoice, Some(due)) if due < issue_date => Err(field_error(
            "due_date",
            "before_issue_date",
            "due date cannot be before the issue date",
        )),
        (DocumentType::Quote, Some(until)) if until < issue_date => Err(field_error(
            "valid_until",
            "before_issue_date",
            "validity date cannot be before the issue date",
        )),
        _ => Ok(()),
    }
}

fn not_found(document_type: DocumentType, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", document_type, id))
}

/// Failure writing a numbered document.
enum WriteError {
    /// The allocated number is already taken in the target table.
    Collision,
    Failed(AppError),
}

impl From<AppError> for WriteError {
    fn from(err: AppError) -> Self {
        WriteError::Failed(err)
    }
}

fn write_error(context: &'static str) -> impl Fn(sqlx::Error) -> WriteError {
    move |err| {
        if violates_constraint(&err, INVOICE_NUMBER_KEY) || violates_constraint(&err, QUOTE_NUMBER_KEY)
        {
            WriteError::Collision
        } else {
            WriteError::Failed(classify_db_error(err, context))
        }
    }
}

/// Header values for a new document row.
struct NewDocument<'a> {
    client_id: Uuid,
    series: &'a str,
    issue_date: NaiveDate,
    terms_date: Option<NaiveDate>,
    currency: &'a str,
    tax_rate: Decimal,
    notes: Option<&'a str>,
    totals: Totals,
    quote_id: Option<Uuid>,
}

/// Values for one line row.
struct NewLine<'a> {
    position: i32,
    description: &'a str,
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
    amounts: LineAmounts,
}

fn line_inputs(lines: &[LineDraft]) -> Vec<LineInput> {
    lines
        .iter()
        .map(|l| LineInput {
            quantity: l.quantity,
            unit_price: l.unit_price,
            discount: l.discount,
        })
        .collect()
}

fn drafted_lines<'a>(lines: &'a [LineDraft], computation: &Computation) -> Vec<NewLine<'a>> {
    lines
        .iter()
        .zip(&computation.lines)
        .enumerate()
        .map(|(position, (draft, amounts))| NewLine {
            position: position as i32,
            description: &draft.description,
            quantity: draft.quantity,
            unit_price: draft.unit_price,
            discount: draft.discount,
            amounts: *amounts,
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Row access shared with the signature workflow
// -----------------------------------------------------------------------------

async fn fetch_invoice<'e, E: PgExecutor<'e>>(
    executor: E,
    company_id: Option<Uuid>,
    invoice_id: Uuid,
    for_update: bool,
) -> Result<Option<Invoice>, sqlx::Error> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices \
         WHERE invoice_id = $1 AND ($2::uuid IS NULL OR company_id = $2){}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(invoice_id)
        .bind(company_id)
        .fetch_optional(executor)
        .await
}

async fn fetch_quote<'e, E: PgExecutor<'e>>(
    executor: E,
    company_id: Option<Uuid>,
    quote_id: Uuid,
    for_update: bool,
) -> Result<Option<Quote>, sqlx::Error> {
    let sql = format!(
        "SELECT {QUOTE_COLUMNS} FROM quotes \
         WHERE quote_id = $1 AND ($2::uuid IS NULL OR company_id = $2){}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Quote>(&sql)
        .bind(quote_id)
        .bind(company_id)
        .fetch_optional(executor)
        .await
}

async fn fetch_lines<'e, E: PgExecutor<'e>>(
    executor: E,
    document_type: DocumentType,
    document_id: Uuid,
) -> Result<Vec<LineItem>, sqlx::Error> {
    let sql = format!(
        "SELECT {LINE_COLUMNS} FROM {} WHERE document_id = $1 ORDER BY position",
        document_type.lines_table()
    );
    sqlx::query_as::<_, LineItem>(&sql)
        .bind(document_id)
        .fetch_all(executor)
        .await
}

/// Load a document header with its lines. `company_id = None` skips the tenant filter.
pub(crate) async fn load_document(
    pool: &PgPool,
    company_id: Option<Uuid>,
    document: DocumentRef,
) -> Result<Option<DocumentWithLines>, AppError> {
    let header = match document.document_type {
        DocumentType::Invoice => fetch_invoice(pool, company_id, document.document_id, false)
            .await
            .map_err(db_error("Failed to get invoice"))?
            .map(Document::Invoice),
        DocumentType::Quote => fetch_quote(pool, company_id, document.document_id, false)
            .await
            .map_err(db_error("Failed to get quote"))?
            .map(Document::Quote),
    };

    let Some(header) = header else {
        return Ok(None);
    };

    let lines = fetch_lines(pool, document.document_type, document.document_id)
        .await
        .map_err(db_error("Failed to get document lines"))?;

    Ok(Some(DocumentWithLines {
        document: header,
        lines,
    }))
}

async fn insert_invoice_row(
    conn: &mut PgConnection,
    company_id: Uuid,
    doc: &NewDocument<'_>,
    number: i64,
) -> Result<Invoice, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO invoices (
            invoice_id, company_id, client_id, series, number, issue_date, due_date, currency,
            tax_rate, subtotal, discount, tax, total, status, quote_id, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {INVOICE_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Invoice>(&sql)
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(doc.client_id)
        .bind(doc.series)
        .bind(number)
        .bind(doc.issue_date)
        .bind(doc.terms_date)
        .bind(doc.currency)
        .bind(doc.tax_rate)
        .bind(doc.totals.subtotal)
        .bind(doc.totals.discount)
        .bind(doc.totals.tax)
        .bind(doc.totals.total)
        .bind(InvoiceStatus::Issued.as_str())
        .bind(doc.quote_id)
        .bind(doc.notes)
        .fetch_one(conn)
        .await
}

async fn insert_quote_row(
    conn: &mut PgConnection,
    company_id: Uuid,
    doc: &NewDocument<'_>,
    number: i64,
) -> Result<Quote, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO quotes (
            quote_id, company_id, client_id, series, number, issue_date, valid_until, currency,
            tax_rate, subtotal, discount, tax, total, status, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {QUOTE_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Quote>(&sql)
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(doc.client_id)
        .bind(doc.series)
        .bind(number)
        .bind(doc.issue_date)
        .bind(doc.terms_date)
        .bind(doc.currency)
        .bind(doc.tax_rate)
        .bind(doc.totals.subtotal)
        .bind(doc.totals.discount)
        .bind(doc.totals.tax)
        .bind(doc.totals.total)
        .bind(QuoteStatus::Pending.as_str())
        .bind(doc.notes)
        .fetch_one(conn)
        .await
}

async fn insert_lines(
    conn: &mut PgConnection,
    document_type: DocumentType,
    document_id: Uuid,
    lines: &[NewLine<'_>],
) -> Result<Vec<LineItem>, sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} ({LINE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING {LINE_COLUMNS}",
        document_type.lines_table()
    );

    let mut inserted = Vec::with_capacity(lines.len());
    for line in lines {
        let row = sqlx::query_as::<_, LineItem>(&sql)
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(line.position)
            .bind(line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.discount)
            .bind(line.amounts.subtotal)
            .bind(line.amounts.tax)
            .bind(line.amounts.total)
            .fetch_one(&mut *conn)
            .await?;
        inserted.push(row);
    }
    Ok(inserted)
}

/// Document lifecycle operations, all scoped to one company.
#[derive(Clone)]
pub struct DocumentService {
    db: Arc<Database>,
    allocator: SequenceAllocator,
}

impl DocumentService {
    pub fn new(db: Arc<Database>, allocator: SequenceAllocator) -> Self {
        Self { db, allocator }
    }

    /// Validate, compute totals, allocate a number and persist the document with its lines.
    #[instrument(skip(self, draft), fields(company_id = %company_id, document_type = %document_type))]
    pub async fn create_document(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        draft: DocumentDraft,
    ) -> Result<DocumentWithLines, AppError> {
        let company = self.db.require_company(company_id).await?;

        let tax_rate = draft.tax_rate.unwrap_or(company.tax_rate);
        validate_tax_rate(tax_rate)?;
        let issue_date = draft.issue_date.unwrap_or_else(today);
        validate_terms_date(document_type, issue_date, draft.terms_date)?;

        let series = draft
            .series
            .clone()
            .unwrap_or_else(|| company.default_series(document_type).to_string());
        let currency = draft
            .currency
            .as_deref()
            .unwrap_or(&company.currency)
            .to_uppercase();

        let inputs = line_inputs(&draft.lines);
        validate_line_amounts(&inputs)?;
        let computation = calculator::compute(&inputs, tax_rate);
        let header = NewDocument {
            client_id: draft.client_id,
            series: &series,
            issue_date,
            terms_date: draft.terms_date,
            currency: &currency,
            tax_rate,
            notes: draft.notes.as_deref(),
            totals: computation.totals,
            quote_id: None,
        };
        let lines = drafted_lines(&draft.lines, &computation);

        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let number = self
                .allocator
                .next_number(company_id, document_type, &series)
                .await?;

            match self
                .insert_document(company_id, document_type, &header, number, &lines)
                .await
            {
                Ok(created) => {
                    DOCUMENTS_CREATED_TOTAL
                        .with_label_values(&[document_type.as_str()])
                        .inc();
                    info!(
                        document_id = %created.document.id(),
                        number = %created.document.display_number(),
                        total = %created.document.total(),
                        "Document created"
                    );
                    return Ok(created);
                }
                Err(WriteError::Collision) => {
                    ALLOCATION_CONFLICTS_TOTAL
                        .with_label_values(&[document_type.as_str(), "retried"])
                        .inc();
                    warn!(
                        series = %series,
                        number = number,
                        attempt = attempt,
                        "Allocated number already in use, allocating again"
                    );
                }
                Err(WriteError::Failed(err)) => return Err(err),
            }
        }

        ALLOCATION_CONFLICTS_TOTAL
            .with_label_values(&[document_type.as_str(), "surfaced"])
            .inc();
        Err(AppError::Conflict(anyhow::anyhow!(
            "Could not allocate a free {} number in series '{}', retry the request",
            document_type,
            series
        )))
    }

    async fn insert_document(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        header: &NewDocument<'_>,
        number: i64,
        lines: &[NewLine<'_>],
    ) -> Result<DocumentWithLines, WriteError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_document"])
            .start_timer();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(write_error("Failed to begin document write"))?;

        let document = match document_type {
            DocumentType::Invoice => insert_invoice_row(&mut tx, company_id, header, number)
                .await
                .map(Document::Invoice),
            DocumentType::Quote => insert_quote_row(&mut tx, company_id, header, number)
                .await
                .map(Document::Quote),
        }
        .map_err(write_error("Failed to insert document"))?;

        let lines = insert_lines(&mut tx, document_type, document.id(), lines)
            .await
            .map_err(write_error("Failed to insert document lines"))?;

        tx.commit()
            .await
            .map_err(write_error("Failed to commit document"))?;

        timer.observe_duration();

        Ok(DocumentWithLines { document, lines })
    }

    /// Read a document back with its ordered lines.
    #[instrument(skip(self), fields(company_id = %company_id, document_type = %document_type))]
    pub async fn get_document(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        document_id: Uuid,
    ) -> Result<DocumentWithLines, AppError> {
        let document = DocumentRef {
            document_type,
            document_id,
        };
        load_document(self.db.pool(), Some(company_id), document)
            .await?
            .ok_or_else(|| not_found(document_type, document_id))
    }

    /// Replace a document's lines and recompute its totals.
    ///
    /// Invoices are editable only while issued and never below what has been paid.
    /// Quotes are editable until invoiced; a stored-expired quote given a live
    /// validity date returns to pending. Series and number never change.
    #[instrument(skip(self, draft), fields(company_id = %company_id, document_type = %document_type, document_id = %document_id))]
    pub async fn update_document(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        document_id: Uuid,
        draft: DocumentDraft,
    ) -> Result<DocumentWithLines, AppError> {
        if let Some(rate) = draft.tax_rate {
            validate_tax_rate(rate)?;
        }
        let inputs = line_inputs(&draft.lines);
        validate_line_amounts(&inputs)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_document"])
            .start_timer();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin document update"))?;

        let (document, computation) = match document_type {
            DocumentType::Invoice => {
                let invoice = fetch_invoice(&mut *tx, Some(company_id), document_id, true)
                    .await
                    .map_err(db_error("Failed to lock invoice"))?
                    .ok_or_else(|| not_found(document_type, document_id))?;

                if !invoice.status.is_editable() {
                    return Err(AppError::invalid_state(
                        format!("Invoice cannot be edited while {}", invoice.status.as_str()),
                        invoice.status.as_str(),
                    ));
                }
                ensure_same_series(&draft, &invoice.series)?;

                let tax_rate = draft.tax_rate.unwrap_or(invoice.tax_rate);
                let issue_date = draft.issue_date.unwrap_or(invoice.issue_date);
                validate_terms_date(document_type, issue_date, draft.terms_date)?;

                let computation = calculator::compute(&inputs, tax_rate);
                if computation.totals.total < invoice.amount_paid {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "New total {} is below the amount already paid {}",
                        computation.totals.total,
                        invoice.amount_paid
                    )));
                }
                // An edit down to what has been paid settles the invoice.
                let status = if invoice.amount_paid > Decimal::ZERO
                    && invoice.amount_paid >= computation.totals.total
                {
                    invoice.status.transition_to(InvoiceStatus::Paid)?
                } else {
                    invoice.status
                };

                let sql = format!(
                    r#"
                    UPDATE invoices
                    SET client_id = $3, issue_date = $4, due_date = $5, currency = $6, tax_rate = $7,
                        subtotal = $8, discount = $9, tax = $10, total = $11, notes = $12,
                        status = $13, updated_utc = NOW()
                    WHERE company_id = $1 AND invoice_id = $2
                    RETURNING {INVOICE_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, Invoice>(&sql)
                    .bind(company_id)
                    .bind(document_id)
                    .bind(draft.client_id)
                    .bind(issue_date)
                    .bind(draft.terms_date)
                    .bind(resolve_currency(&draft, &invoice.currency))
                    .bind(tax_rate)
                    .bind(computation.totals.subtotal)
                    .bind(computation.totals.discount)
                    .bind(computation.totals.tax)
                    .bind(computation.totals.total)
                    .bind(&draft.notes)
                    .bind(status.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error("Failed to update invoice"))?;

                (Document::Invoice(updated), computation)
            }
            DocumentType::Quote => {
                let quote = fetch_quote(&mut *tx, Some(company_id), document_id, true)
                    .await
                    .map_err(db_error("Failed to lock quote"))?
                    .ok_or_else(|| not_found(document_type, document_id))?;

                if !quote.status.is_editable() {
                    return Err(AppError::invalid_state(
                        format!("Quote cannot be edited while {}", quote.status.as_str()),
                        quote.status.as_str(),
                    ));
                }
                ensure_same_series(&draft, &quote.series)?;

                let tax_rate = draft.tax_rate.unwrap_or(quote.tax_rate);
                let issue_date = draft.issue_date.unwrap_or(quote.issue_date);
                validate_terms_date(document_type, issue_date, draft.terms_date)?;

                let status = match quote.status {
                    QuoteStatus::Expired if draft.terms_date.map_or(true, |d| d >= today()) => {
                        QuoteStatus::Pending
                    }
                    status => status,
                };

                let computation = calculator::compute(&inputs, tax_rate);

                let sql = format!(
                    r#"
                    UPDATE quotes
                    SET client_id = $3, issue_date = $4, valid_until = $5, currency = $6, tax_rate = $7,
                        subtotal = $8, discount = $9, tax = $10, total = $11, notes = $12,
                        status = $13, updated_utc = NOW()
                    WHERE company_id = $1 AND quote_id = $2
                    RETURNING {QUOTE_COLUMNS}
                    "#
                );
                let updated = sqlx::query_as::<_, Quote>(&sql)
                    .bind(company_id)
                    .bind(document_id)
                    .bind(draft.client_id)
                    .bind(issue_date)
                    .bind(draft.terms_date)
                    .bind(resolve_currency(&draft, &quote.currency))
                    .bind(tax_rate)
                    .bind(computation.totals.subtotal)
                    .bind(computation.totals.discount)
                    .bind(computation.totals.tax)
                    .bind(computation.totals.total)
                    .bind(&draft.notes)
                    .bind(status.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error("Failed to update quote"))?;

                if status != quote.status {
                    info!(quote_id = %document_id, "Expired quote revalidated");
                }

                (Document::Quote(updated), computation)
            }
        };

        sqlx::query(&format!(
            "DELETE FROM {} WHERE document_id = $1",
            document_type.lines_table()
        ))
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to replace document lines"))?;

        let lines = insert_lines(
            &mut tx,
            document_type,
            document_id,
            &drafted_lines(&draft.lines, &computation),
        )
        .await
        .map_err(db_error("Failed to insert document lines"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit document update"))?;

        timer.observe_duration();

        info!(
            document_id = %document_id,
            total = %document.total(),
            "Document updated"
        );

        Ok(DocumentWithLines { document, lines })
    }

    /// Turn a live quote into an invoice carrying the same lines and totals.
    #[instrument(skip(self), fields(company_id = %company_id, quote_id = %quote_id))]
    pub async fn convert_quote_to_invoice(
        &self,
        company_id: Uuid,
        quote_id: Uuid,
    ) -> Result<DocumentWithLines, AppError> {
        let quote = fetch_quote(self.db.pool(), Some(company_id), quote_id, false)
            .await
            .map_err(db_error("Failed to get quote"))?
            .ok_or_else(|| not_found(DocumentType::Quote, quote_id))?;

        // Refuse before burning an invoice number.
        quote.ensure_convertible(today())?;

        let company = self.db.require_company(company_id).await?;
        let series = company.invoice_series;

        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let number = self
                .allocator
                .next_number(company_id, DocumentType::Invoice, &series)
                .await?;

            match self
                .convert_locked(company_id, quote_id, &series, number)
                .await
            {
                Ok(invoice) => {
                    DOCUMENTS_CREATED_TOTAL
                        .with_label_values(&[DocumentType::Invoice.as_str()])
                        .inc();
                    info!(
                        invoice_id = %invoice.document.id(),
                        number = %invoice.document.display_number(),
                        "Quote converted to invoice"
                    );
                    return Ok(invoice);
                }
                Err(WriteError::Collision) => {
                    ALLOCATION_CONFLICTS_TOTAL
                        .with_label_values(&[DocumentType::Invoice.as_str(), "retried"])
                        .inc();
                    warn!(number = number, attempt = attempt, "Invoice number already in use");
                }
                Err(WriteError::Failed(err)) => return Err(err),
            }
        }

        ALLOCATION_CONFLICTS_TOTAL
            .with_label_values(&[DocumentType::Invoice.as_str(), "surfaced"])
            .inc();
        Err(AppError::Conflict(anyhow::anyhow!(
            "Could not allocate a free invoice number in series '{}', retry the request",
            series
        )))
    }

    async fn convert_locked(
        &self,
        company_id: Uuid,
        quote_id: Uuid,
        series: &str,
        number: i64,
    ) -> Result<DocumentWithLines, WriteError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["convert_quote"])
            .start_timer();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(write_error("Failed to begin conversion"))?;

        let quote = fetch_quote(&mut *tx, Some(company_id), quote_id, true)
            .await
            .map_err(write_error("Failed to lock quote"))?
            .ok_or_else(|| not_found(DocumentType::Quote, quote_id))?;

        // Another conversion may have won the race while the number was allocated.
        quote.ensure_convertible(today())?;
        let next_status = quote.status.transition_to(QuoteStatus::Invoiced)?;

        let header = NewDocument {
            client_id: quote.client_id,
            series,
            issue_date: today(),
            terms_date: None,
            currency: &quote.currency,
            tax_rate: quote.tax_rate,
            notes: quote.notes.as_deref(),
            totals: Totals {
                subtotal: quote.subtotal,
                discount: quote.discount,
                tax: quote.tax,
                total: quote.total,
            },
            quote_id: Some(quote.quote_id),
        };

        let invoice = insert_invoice_row(&mut tx, company_id, &header, number)
            .await
            .map_err(write_error("Failed to insert invoice"))?;

        let quote_lines = fetch_lines(&mut *tx, DocumentType::Quote, quote_id)
            .await
            .map_err(write_error("Failed to read quote lines"))?;
        let copies: Vec<NewLine<'_>> = quote_lines
            .iter()
            .map(|line| NewLine {
                position: line.position,
                description: &line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
                amounts: LineAmounts {
                    subtotal: line.subtotal,
                    tax: line.tax,
                    total: line.total,
                },
            })
            .collect();
        let lines = insert_lines(&mut tx, DocumentType::Invoice, invoice.invoice_id, &copies)
            .await
            .map_err(write_error("Failed to copy quote lines"))?;

        sqlx::query(
            r#"
            UPDATE quotes
            SET status = $3, invoice_id = $4, updated_utc = NOW()
            WHERE company_id = $1 AND quote_id = $2
            "#,
        )
        .bind(company_id)
        .bind(quote_id)
        .bind(next_status.as_str())
        .bind(invoice.invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(write_error("Failed to mark quote invoiced"))?;

        tx.commit()
            .await
            .map_err(write_error("Failed to commit conversion"))?;

        timer.observe_duration();

        Ok(DocumentWithLines {
            document: Document::Invoice(invoice),
            lines,
        })
    }

    /// Apply a payment; the invoice becomes paid once payments cover its total.
    #[instrument(skip(self, input), fields(company_id = %company_id, invoice_id = %invoice_id))]
    pub async fn register_payment(
        &self,
        company_id: Uuid,
        invoice_id: Uuid,
        input: CreatePayment,
    ) -> Result<PaymentOutcome, AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be greater than zero"
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_payment"])
            .start_timer();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin payment"))?;

        let invoice = fetch_invoice(&mut *tx, Some(company_id), invoice_id, true)
            .await
            .map_err(db_error("Failed to lock invoice"))?
            .ok_or_else(|| not_found(DocumentType::Invoice, invoice_id))?;

        if invoice.status == InvoiceStatus::Void {
            return Err(AppError::invalid_state(
                "Cannot register a payment on a void invoice",
                invoice.status.as_str(),
            ));
        }

        let paid_so_far: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to sum payments"))?;

        let balance = invoice.total - paid_so_far;
        if input.amount > balance {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount {} exceeds balance due {}",
                input.amount,
                balance
            )));
        }

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, company_id, invoice_id, amount, method, payment_date, reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(invoice_id)
        .bind(input.amount)
        .bind(&input.method)
        .bind(input.payment_date.unwrap_or_else(today))
        .bind(&input.reference)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to record payment"))?;

        let amount_paid = paid_so_far + input.amount;
        let status = if amount_paid >= invoice.total {
            invoice.status.transition_to(InvoiceStatus::Paid)?
        } else {
            invoice.status
        };

        sqlx::query(
            r#"
            UPDATE invoices
            SET amount_paid = $3, status = $4, updated_utc = NOW()
            WHERE company_id = $1 AND invoice_id = $2
            "#,
        )
        .bind(company_id)
        .bind(invoice_id)
        .bind(amount_paid)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update invoice balance"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit payment"))?;

        timer.observe_duration();

        PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc();
        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = status.as_str(),
            "Payment registered"
        );

        Ok(PaymentOutcome {
            payment,
            invoice_status: status,
            amount_paid,
            balance_due: invoice.total - amount_paid,
        })
    }

    /// Payments on an invoice, oldest first.
    #[instrument(skip(self), fields(company_id = %company_id, invoice_id = %invoice_id))]
    pub async fn list_payments(
        &self,
        company_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        fetch_invoice(self.db.pool(), Some(company_id), invoice_id, false)
            .await
            .map_err(db_error("Failed to get invoice"))?
            .ok_or_else(|| not_found(DocumentType::Invoice, invoice_id))?;

        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE company_id = $1 AND invoice_id = $2 ORDER BY created_utc, payment_id"
        ))
        .bind(company_id)
        .bind(invoice_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_error("Failed to list payments"))
    }

    /// Void an issued invoice and cancel its pending signature requests.
    #[instrument(skip(self), fields(company_id = %company_id, invoice_id = %invoice_id))]
    pub async fn void_invoice(
        &self,
        company_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<DocumentWithLines, AppError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin void"))?;

        let invoice = fetch_invoice(&mut *tx, Some(company_id), invoice_id, true)
            .await
            .map_err(db_error("Failed to lock invoice"))?
            .ok_or_else(|| not_found(DocumentType::Invoice, invoice_id))?;

        let next = invoice.status.transition_to(InvoiceStatus::Void)?;

        let voided = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $3, voided_utc = NOW(), updated_utc = NOW()
            WHERE company_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(company_id)
        .bind(invoice_id)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to void invoice"))?;

        let cancelled = sqlx::query(
            r#"
            UPDATE signature_requests
            SET status = 'CANCELLED', updated_utc = NOW()
            WHERE invoice_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to cancel signature requests"))?
        .rows_affected();

        let lines = fetch_lines(&mut *tx, DocumentType::Invoice, invoice_id)
            .await
            .map_err(db_error("Failed to get invoice lines"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit void"))?;

        info!(
            invoice_id = %invoice_id,
            cancelled_signature_requests = cancelled,
            "Invoice voided"
        );

        Ok(DocumentWithLines {
            document: Document::Invoice(voided),
            lines,
        })
    }

    /// Approve, reject or reopen a quote through the transition table.
    #[instrument(skip(self), fields(company_id = %company_id, quote_id = %quote_id))]
    pub async fn change_quote_status(
        &self,
        company_id: Uuid,
        quote_id: Uuid,
        target: QuoteStatus,
    ) -> Result<DocumentWithLines, AppError> {
        if !matches!(
            target,
            QuoteStatus::Pending | QuoteStatus::Approved | QuoteStatus::Rejected
        ) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A quote becomes {} only through conversion or expiry",
                target.as_str()
            )));
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin status change"))?;

        let quote = fetch_quote(&mut *tx, Some(company_id), quote_id, true)
            .await
            .map_err(db_error("Failed to lock quote"))?
            .ok_or_else(|| not_found(DocumentType::Quote, quote_id))?;

        let current = quote.effective_status(today());
        let next = current.transition_to(target).inspect_err(|_| {
            warn!(
                from = current.as_str(),
                to = target.as_str(),
                "Quote status change refused"
            );
        })?;

        let updated = sqlx::query_as::<_, Quote>(&format!(
            r#"
            UPDATE quotes
            SET status = $3, updated_utc = NOW()
            WHERE company_id = $1 AND quote_id = $2
            RETURNING {QUOTE_COLUMNS}
            "#
        ))
        .bind(company_id)
        .bind(quote_id)
        .bind(next.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to change quote status"))?;

        let lines = fetch_lines(&mut *tx, DocumentType::Quote, quote_id)
            .await
            .map_err(db_error("Failed to get quote lines"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit status change"))?;

        info!(
            from = current.as_str(),
            to = next.as_str(),
            "Quote status changed"
        );

        Ok(DocumentWithLines {
            document: Document::Quote(updated),
            lines,
        })
    }

    /// Delete a quote that has not been invoiced.
    #[instrument(skip(self), fields(company_id = %company_id, quote_id = %quote_id))]
    pub async fn delete_quote(&self, company_id: Uuid, quote_id: Uuid) -> Result<(), AppError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin delete"))?;

        let quote = fetch_quote(&mut *tx, Some(company_id), quote_id, true)
            .await
            .map_err(db_error("Failed to lock quote"))?
            .ok_or_else(|| not_found(DocumentType::Quote, quote_id))?;

        if !quote.status.is_editable() {
            return Err(AppError::invalid_state(
                "Invoiced quotes cannot be deleted",
                quote.status.as_str(),
            ));
        }

        sqlx::query("DELETE FROM quotes WHERE company_id = $1 AND quote_id = $2")
            .bind(company_id)
            .bind(quote_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to delete quote"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit delete"))?;

        info!(quote_id = %quote_id, "Quote deleted");
        Ok(())
    }
}

fn ensure_same_series(draft: &DocumentDraft, current: &str) -> Result<(), AppError> {
    match draft.series.as_deref() {
        Some(series) if series != current => Err(AppError::BadRequest(anyhow::anyhow!(
            "Series cannot change after numbering (document is in '{}')",
            current
        ))),
        _ => Ok(()),
    }
}

fn resolve_currency(draft: &DocumentDraft, current: &str) -> String {
    draft.currency.as_deref().unwrap_or(current).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn tax_rate_bounds() {
        assert!(validate_tax_rate(dec!(0)).is_ok());
        assert!(validate_tax_rate(dec!(100)).is_ok());
        assert!(validate_tax_rate(dec!(18.5000)).is_ok());
        assert!(validate_tax_rate(dec!(7.1234)).is_ok());

        for rate in [dec!(-0.01), dec!(100.01), dec!(7.12345)] {
            let err = validate_tax_rate(rate).unwrap_err();
            assert_eq!(err.code(), "validation_error", "rate {}", rate);
        }
    }

    #[test]
    fn terms_date_cannot_precede_issue_date() {
        let issue = date(2026, 5, 10);
        assert!(validate_terms_date(DocumentType::Invoice, issue, Some(issue)).is_ok());
        assert!(validate_terms_date(DocumentType::Quote, issue, None).is_ok());
        assert!(validate_terms_date(DocumentType::Invoice, issue, Some(date(2026, 5, 9))).is_err());
        assert!(validate_terms_date(DocumentType::Quote, issue, Some(date(2026, 5, 1))).is_err());
    }

    #[test]
    fn oversized_lines_fail_validation_on_the_lines_field() {
        let huge = LineInput {
            quantity: dec!(1000000000000),
            unit_price: dec!(1000000000000),
            discount: dec!(0),
        };
        match validate_line_amounts(&[huge]) {
            Err(AppError::ValidationError(errors)) => {
                assert!(errors.field_errors().contains_key("lines"))
            }
            other => panic!("expected a validation error, got {:?}", other),
        }

        let ordinary = LineInput {
            quantity: dec!(2),
            unit_price: dec!(100),
            discount: dec!(0),
        };
        assert!(validate_line_amounts(&[ordinary]).is_ok());
    }

    #[test]
    fn lines_keep_submission_order() {
        let drafts = vec![
            LineDraft {
                description: "Design".to_string(),
                quantity: dec!(10),
                unit_price: dec!(80),
                discount: dec!(0),
            },
            LineDraft {
                description: "Hosting".to_string(),
                quantity: dec!(1),
                unit_price: dec!(20),
                discount: dec!(5),
            },
        ];
        let computation = calculator::compute(&line_inputs(&drafts), dec!(10));
        let lines = drafted_lines(&drafts, &computation);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].position, 0);
        assert_eq!(lines[1].position, 1);
        assert_eq!(lines[1].description, "Hosting");
        assert_eq!(lines[1].amounts.subtotal, dec!(15.00));
        assert_eq!(lines[1].amounts.total, dec!(16.50));
    }

    #[test]
    fn series_is_fixed_once_numbered() {
        let mut draft = DocumentDraft {
            client_id: Uuid::new_v4(),
            series: None,
            issue_date: None,
            terms_date: None,
            currency: Some("eur".to_string()),
            tax_rate: None,
            notes: None,
            lines: Vec::new(),
        };
        assert!(ensure_same_series(&draft, "INV").is_ok());
        assert_eq!(resolve_currency(&draft, "USD"), "EUR");

        draft.series = Some("INV".to_string());
        assert!(ensure_same_series(&draft, "INV").is_ok());

        draft.series = Some("B".to_string());
        assert_eq!(
            ensure_same_series(&draft, "INV").unwrap_err().code(),
            "bad_request"
        );
    }
}
