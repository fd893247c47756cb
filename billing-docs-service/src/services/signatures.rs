//! Token-based e-signature workflow.
//!
//! A request is signable only while `PENDING` and before `expires_utc`. Every
//! check that decides whether a signature is accepted runs again under the
//! request row lock at submit time.

use crate::models::{
    Document, DocumentRef, DocumentType, DocumentWithLines, InvoiceStatus, Signature,
    SignatureRequest, SignatureStatus, SignerContext, SigningState, SubmitSignature,
};
use crate::services::database::{db_error, Database};
use crate::services::documents::load_document;
use crate::services::metrics::{DB_QUERY_DURATION, SIGNATURE_EVENTS_TOTAL};
use crate::services::notifier::{NotificationEvent, Notifier};
use crate::services::storage::{signature_image_key, ArtifactStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TOKEN_BYTES: usize = 32;

/// Largest decoded signature image accepted.
pub const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

/// Request body limit for signature submission: a base64 image of
/// `MAX_IMAGE_BYTES` plus room for the data URL prefix and the other fields.
pub const MAX_SUBMIT_BODY_BYTES: usize = MAX_IMAGE_BYTES.div_ceil(3) * 4 + 64 * 1024;

/// Recorded when the signer does not submit their own consent wording.
pub const DEFAULT_CONSENT_TEXT: &str = "I agree that my electronic signature is the legal \
    equivalent of my handwritten signature on this document.";

const REQUEST_COLUMNS: &str = "signature_request_id, invoice_id, quote_id, token, signer_email, \
    signer_name, status, expires_utc, viewed_utc, created_utc, updated_utc";

const SIGNATURE_COLUMNS: &str = "signature_id, signature_request_id, image_ref, consent_given, \
    consent_text, signer_ip, signer_user_agent, signed_utc";

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Decode a base64 image, optionally wrapped in a `data:` URL.
pub fn decode_signature_image(payload: &str) -> Result<Vec<u8>, AppError> {
    let encoded = match payload.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    }
    .trim();

    if encoded.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Signature image is empty"
        )));
    }

    let bytes = STANDARD.decode(encoded).map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Signature image is not valid base64: {}", e))
    })?;

    if bytes.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Signature image is empty"
        )));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Signature image exceeds {} bytes",
            MAX_IMAGE_BYTES
        )));
    }

    Ok(bytes)
}

/// A freshly created request and where the signer should go.
#[derive(Debug, Clone)]
pub struct SignatureRequestCreated {
    pub request: SignatureRequest,
    pub signing_path: String,
    pub signing_url: Option<String>,
}

/// What the signing page shows for a valid token.
#[derive(Debug, Clone)]
pub struct SigningView {
    pub request: SignatureRequest,
    pub document: DocumentWithLines,
}

#[derive(Debug, Clone)]
pub struct SignatureReceipt {
    pub request: SignatureRequest,
    pub signature: Signature,
}

#[derive(Debug, Clone)]
pub struct SignatureStatusReport {
    pub request: SignatureRequest,
    pub status: SignatureStatus,
    pub signed_utc: Option<DateTime<Utc>>,
}

async fn fetch_by_token(
    conn: &mut PgConnection,
    token: &str,
    for_update: bool,
) -> Result<SignatureRequest, AppError> {
    let sql = format!(
        "SELECT {REQUEST_COLUMNS} FROM signature_requests WHERE token = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, SignatureRequest>(&sql)
        .bind(token)
        .fetch_optional(conn)
        .await
        .map_err(db_error("Failed to look up signature token"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Signature request not found")))
}

async fn signed_at(
    conn: &mut PgConnection,
    request: &SignatureRequest,
) -> Result<DateTime<Utc>, AppError> {
    let signed: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT signed_utc FROM signatures WHERE signature_request_id = $1",
    )
    .bind(request.signature_request_id)
    .fetch_optional(conn)
    .await
    .map_err(db_error("Failed to read signature"))?;

    Ok(signed.unwrap_or(request.updated_utc))
}

/// The error for a request that cannot be signed. A lapsed request is
/// persisted as `EXPIRED` on `conn` first.
async fn closed_error(
    conn: &mut PgConnection,
    request: &SignatureRequest,
    state: SigningState,
) -> Result<AppError, AppError> {
    let err = match state {
        SigningState::Signed => AppError::AlreadySigned {
            signed_at: signed_at(conn, request).await?,
        },
        SigningState::Cancelled => {
            AppError::Cancelled(anyhow::anyhow!("Signature request was cancelled"))
        }
        SigningState::Expired => {
            AppError::Expired(anyhow::anyhow!("Signature request has expired"))
        }
        SigningState::Lapsed => {
            sqlx::query(
                r#"
                UPDATE signature_requests
                SET status = 'EXPIRED', updated_utc = NOW()
                WHERE signature_request_id = $1 AND status = 'PENDING'
                "#,
            )
            .bind(request.signature_request_id)
            .execute(&mut *conn)
            .await
            .map_err(db_error("Failed to expire signature request"))?;

            SIGNATURE_EVENTS_TOTAL.with_label_values(&["expired"]).inc();
            info!(
                signature_request_id = %request.signature_request_id,
                "Signature request expired on access"
            );
            AppError::Expired(anyhow::anyhow!("Signature request has expired"))
        }
        SigningState::Open => {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Open signature request treated as closed"
            )))
        }
    };
    Ok(err)
}

#[derive(Clone)]
pub struct SignatureService {
    db: Arc<Database>,
    storage: Arc<dyn ArtifactStore>,
    notifier: Notifier,
    ttl: Duration,
    public_base_url: Option<String>,
}

impl SignatureService {
    pub fn new(
        db: Arc<Database>,
        storage: Arc<dyn ArtifactStore>,
        notifier: Notifier,
        ttl_days: i64,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            db,
            storage,
            notifier,
            ttl: Duration::days(ttl_days),
            public_base_url,
        }
    }

    fn signing_path(token: &str) -> String {
        format!("/sign/{}", token)
    }

    /// Open a signature request for a document owned by the company.
    #[instrument(skip(self, signer_email, signer_name), fields(company_id = %company_id, document_type = %document.document_type))]
    pub async fn request_signature(
        &self,
        company_id: Uuid,
        document: DocumentRef,
        signer_email: String,
        signer_name: Option<String>,
    ) -> Result<SignatureRequestCreated, AppError> {
        let loaded = load_document(self.db.pool(), Some(company_id), document)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "{} {} not found",
                    document.document_type,
                    document.document_id
                ))
            })?;

        if let Document::Invoice(invoice) = &loaded.document {
            if invoice.status == InvoiceStatus::Void {
                return Err(AppError::invalid_state(
                    "Void invoices cannot be sent for signature",
                    invoice.status.as_str(),
                ));
            }
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["request_signature"])
            .start_timer();

        let (invoice_id, quote_id) = match document.document_type {
            DocumentType::Invoice => (Some(document.document_id), None),
            DocumentType::Quote => (None, Some(document.document_id)),
        };
        let token = generate_token();
        let expires_utc = Utc::now() + self.ttl;

        let request = sqlx::query_as::<_, SignatureRequest>(&format!(
            r#"
            INSERT INTO signature_requests (
                signature_request_id, invoice_id, quote_id, token, signer_email, signer_name,
                status, expires_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(quote_id)
        .bind(&token)
        .bind(&signer_email)
        .bind(&signer_name)
        .bind(SignatureStatus::Pending.as_str())
        .bind(expires_utc)
        .fetch_one(self.db.pool())
        .await
        .map_err(db_error("Failed to create signature request"))?;

        timer.observe_duration();
        SIGNATURE_EVENTS_TOTAL.with_label_values(&["requested"]).inc();

        let signing_path = Self::signing_path(&token);
        let signing_url = self
            .public_base_url
            .as_ref()
            .map(|base| format!("{}{}", base, signing_path));

        info!(
            signature_request_id = %request.signature_request_id,
            expires_utc = %request.expires_utc,
            "Signature requested"
        );

        self.notifier.dispatch(NotificationEvent::SignatureRequested {
            to: signer_email,
            signer_name,
            document_number: loaded.document.display_number(),
            signing_link: signing_url.clone().unwrap_or_else(|| signing_path.clone()),
            expires_utc: request.expires_utc,
        });

        Ok(SignatureRequestCreated {
            request,
            signing_path,
            signing_url,
        })
    }

    /// Check a token from the signing page and record the first view.
    #[instrument(skip(self, token))]
    pub async fn validate_token(&self, token: &str) -> Result<SigningView, AppError> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(db_error("Failed to acquire connection"))?;

        let request = fetch_by_token(&mut conn, token, false).await?;

        let state = request.signing_state(Utc::now());
        if state != SigningState::Open {
            let err = closed_error(&mut conn, &request, state).await?;
            warn!(
                signature_request_id = %request.signature_request_id,
                code = err.code(),
                "Signature token refused"
            );
            return Err(err);
        }

        let first_view = request.viewed_utc.is_none();
        let viewed = sqlx::query_as::<_, SignatureRequest>(&format!(
            r#"
            UPDATE signature_requests
            SET viewed_utc = COALESCE(viewed_utc, NOW()),
                updated_utc = CASE WHEN viewed_utc IS NULL THEN NOW() ELSE updated_utc END
            WHERE signature_request_id = $1 AND status = 'PENDING'
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.signature_request_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("Failed to record signature view"))?
        .unwrap_or(request);

        drop(conn);

        if first_view {
            SIGNATURE_EVENTS_TOTAL.with_label_values(&["viewed"]).inc();
        }

        let document = load_document(self.db.pool(), None, viewed.document_ref()?)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Document no longer exists")))?;

        Ok(SigningView {
            request: viewed,
            document,
        })
    }

    /// Accept a signature for a pending, unexpired request.
    #[instrument(skip(self, token, submission, signer))]
    pub async fn submit_signature(
        &self,
        token: &str,
        submission: SubmitSignature,
        signer: SignerContext,
    ) -> Result<SignatureReceipt, AppError> {
        if !submission.consent {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Consent is required to sign"
            )));
        }
        let image = decode_signature_image(&submission.image)?;
        let consent_text = submission
            .consent_text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONSENT_TEXT.to_string());

        // The image is stored before the request row is locked. Requests that
        // are already closed skip the upload and fail under the lock below.
        let pending = {
            let mut conn = self
                .db
                .pool()
                .acquire()
                .await
                .map_err(db_error("Failed to acquire connection"))?;
            fetch_by_token(&mut conn, token, false).await?
        };
        let image_ref = if pending.signing_state(Utc::now()) == SigningState::Open {
            let key = signature_image_key(pending.signature_request_id);
            self.storage.upload(&key, image).await?;
            Some(key)
        } else {
            None
        };

        let timer = DB_QUERY_DURATION
            .with_label_values(&["submit_signature"])
            .start_timer();

        let recorded = self
            .record_signature(token, image_ref.as_deref(), &consent_text, &signer)
            .await;
        let (request, signature) = match recorded {
            Ok(recorded) => recorded,
            Err(err) => {
                if let Some(key) = &image_ref {
                    if let Err(cleanup) = self.storage.delete(key).await {
                        warn!(error = %cleanup, image_ref = %key, "Failed to remove orphaned signature image");
                    }
                }
                return Err(err);
            }
        };

        timer.observe_duration();
        SIGNATURE_EVENTS_TOTAL.with_label_values(&["signed"]).inc();

        info!(
            signature_request_id = %request.signature_request_id,
            signature_id = %signature.signature_id,
            "Document signed"
        );

        self.notify_signed(&request, &signature).await;

        Ok(SignatureReceipt { request, signature })
    }

    /// Re-check the request under its row lock and record the signature.
    async fn record_signature(
        &self,
        token: &str,
        image_ref: Option<&str>,
        consent_text: &str,
        signer: &SignerContext,
    ) -> Result<(SignatureRequest, Signature), AppError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin signature"))?;

        let request = fetch_by_token(&mut tx, token, true).await?;

        let state = request.signing_state(Utc::now());
        if state != SigningState::Open {
            let err = closed_error(&mut tx, &request, state).await?;
            tx.commit()
                .await
                .map_err(db_error("Failed to commit signature refusal"))?;
            warn!(
                signature_request_id = %request.signature_request_id,
                code = err.code(),
                "Signature submission refused"
            );
            return Err(err);
        }

        let image_ref = image_ref.ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "No signature image stored for request {}",
                request.signature_request_id
            ))
        })?;

        let signature = sqlx::query_as::<_, Signature>(&format!(
            r#"
            INSERT INTO signatures (
                signature_id, signature_request_id, image_ref, consent_given, consent_text,
                signer_ip, signer_user_agent
            )
            VALUES ($1, $2, $3, TRUE, $4, $5, $6)
            RETURNING {SIGNATURE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.signature_request_id)
        .bind(image_ref)
        .bind(consent_text)
        .bind(&signer.ip)
        .bind(&signer.user_agent)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to store signature"))?;

        let request = sqlx::query_as::<_, SignatureRequest>(&format!(
            r#"
            UPDATE signature_requests
            SET status = $2, updated_utc = NOW()
            WHERE signature_request_id = $1
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.signature_request_id)
        .bind(SignatureStatus::Signed.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to mark request signed"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit signature"))?;

        Ok((request, signature))
    }

    /// Tell the issuing company a document was signed, when it has an address.
    async fn notify_signed(&self, request: &SignatureRequest, signature: &Signature) {
        let document_ref = match request.document_ref() {
            Ok(document_ref) => document_ref,
            Err(e) => {
                warn!(error = %e, "Could not resolve signed document for notification");
                return;
            }
        };
        let document = match load_document(self.db.pool(), None, document_ref).await {
            Ok(Some(document)) => document.document,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Could not load signed document for notification");
                return;
            }
        };

        match self.db.get_company(document.company_id()).await {
            Ok(Some(company)) => {
                if let Some(to) = company.email {
                    self.notifier.dispatch(NotificationEvent::DocumentSigned {
                        to,
                        document_number: document.display_number(),
                        signer_email: request.signer_email.clone(),
                        signed_utc: signature.signed_utc,
                    });
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not load company for signed notification"),
        }
    }

    /// Effective status for a token. Does not count as a view.
    #[instrument(skip(self, token))]
    pub async fn signature_status(&self, token: &str) -> Result<SignatureStatusReport, AppError> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(db_error("Failed to acquire connection"))?;

        let request = fetch_by_token(&mut conn, token, false).await?;
        let status = request.effective_status(Utc::now());
        let signed_utc = match status {
            SignatureStatus::Signed => Some(signed_at(&mut conn, &request).await?),
            _ => None,
        };

        Ok(SignatureStatusReport {
            request,
            status,
            signed_utc,
        })
    }

    /// Cancel a pending request belonging to the company.
    #[instrument(skip(self), fields(company_id = %company_id, signature_request_id = %request_id))]
    pub async fn cancel_signature(
        &self,
        company_id: Uuid,
        request_id: Uuid,
    ) -> Result<SignatureRequest, AppError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_error("Failed to begin cancellation"))?;

        let request = sqlx::query_as::<_, SignatureRequest>(
            r#"
            SELECT sr.signature_request_id, sr.invoice_id, sr.quote_id, sr.token, sr.signer_email,
                   sr.signer_name, sr.status, sr.expires_utc, sr.viewed_utc, sr.created_utc,
                   sr.updated_utc
            FROM signature_requests sr
            LEFT JOIN invoices i ON i.invoice_id = sr.invoice_id
            LEFT JOIN quotes q ON q.quote_id = sr.quote_id
            WHERE sr.signature_request_id = $1
              AND COALESCE(i.company_id, q.company_id) = $2
            FOR UPDATE OF sr
            "#,
        )
        .bind(request_id)
        .bind(company_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock signature request"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Signature request not found")))?;

        let current = request.effective_status(Utc::now());
        if current != SignatureStatus::Pending {
            return Err(AppError::invalid_state(
                "Only pending signature requests can be cancelled",
                current.as_str(),
            ));
        }

        let cancelled = sqlx::query_as::<_, SignatureRequest>(&format!(
            r#"
            UPDATE signature_requests
            SET status = $2, updated_utc = NOW()
            WHERE signature_request_id = $1
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request_id)
        .bind(SignatureStatus::Cancelled.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to cancel signature request"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit cancellation"))?;

        SIGNATURE_EVENTS_TOTAL.with_label_values(&["cancelled"]).inc();
        info!("Signature request cancelled");

        Ok(cancelled)
    }

    /// Signature requests for one document, newest first.
    #[instrument(skip(self), fields(company_id = %company_id, document_type = %document.document_type))]
    pub async fn list_signature_requests(
        &self,
        company_id: Uuid,
        document: DocumentRef,
    ) -> Result<Vec<SignatureRequest>, AppError> {
        load_document(self.db.pool(), Some(company_id), document)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "{} {} not found",
                    document.document_type,
                    document.document_id
                ))
            })?;

        let column = match document.document_type {
            DocumentType::Invoice => "invoice_id",
            DocumentType::Quote => "quote_id",
        };

        sqlx::query_as::<_, SignatureRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM signature_requests \
             WHERE {column} = $1 ORDER BY created_utc DESC"
        ))
        .bind(document.document_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_error("Failed to list signature requests"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let encoded = STANDARD.encode(b"\x89PNG fake image");
        assert_eq!(
            decode_signature_image(&encoded).unwrap(),
            b"\x89PNG fake image".to_vec()
        );

        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(
            decode_signature_image(&data_url).unwrap(),
            b"\x89PNG fake image".to_vec()
        );
    }

    #[test]
    fn rejects_unusable_images() {
        for payload in ["", "data:image/png;base64,", "not base64 at all!", "   "] {
            let err = decode_signature_image(payload).unwrap_err();
            assert_eq!(err.code(), "bad_request", "payload {:?}", payload);
        }

        let oversized = STANDARD.encode(vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert_eq!(
            decode_signature_image(&oversized).unwrap_err().code(),
            "bad_request"
        );
    }

    #[test]
    fn largest_image_fits_the_submit_body_limit() {
        let payload = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(vec![0u8; MAX_IMAGE_BYTES])
        );
        assert!(decode_signature_image(&payload).is_ok());

        let body = serde_json::json!({
            "token": "ab".repeat(32),
            "signature_image": payload,
            "consent": true,
            "consent_text": "x".repeat(2000)
        });
        assert!(body.to_string().len() <= MAX_SUBMIT_BODY_BYTES);
    }

    #[test]
    fn signing_path_embeds_token() {
        assert_eq!(SignatureService::signing_path("abc"), "/sign/abc");
    }
}
