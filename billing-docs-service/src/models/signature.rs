//! E-signature request and signature models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use service_core::error::AppError;
use uuid::Uuid;

use super::{DocumentRef, DocumentType, UnknownStatus};

/// Signature request status. Only `Pending` accepts a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Expired,
    Cancelled,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "PENDING",
            SignatureStatus::Signed => "SIGNED",
            SignatureStatus::Expired => "EXPIRED",
            SignatureStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignatureStatus::Pending)
    }
}

impl TryFrom<String> for SignatureStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(SignatureStatus::Pending),
            "SIGNED" => Ok(SignatureStatus::Signed),
            "EXPIRED" => Ok(SignatureStatus::Expired),
            "CANCELLED" => Ok(SignatureStatus::Cancelled),
            _ => Err(UnknownStatus {
                kind: "signature request",
                value,
            }),
        }
    }
}

/// Whether a request can be signed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Open,
    Signed,
    Cancelled,
    Expired,
    /// Stored as pending but past its expiry; needs to be persisted as expired.
    Lapsed,
}

/// Signature request row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SignatureRequest {
    pub signature_request_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub token: String,
    pub signer_email: String,
    pub signer_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: SignatureStatus,
    pub expires_utc: DateTime<Utc>,
    pub viewed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl SignatureRequest {
    /// Document the request points at. The table guarantees exactly one link.
    pub fn document_ref(&self) -> Result<DocumentRef, AppError> {
        match (self.invoice_id, self.quote_id) {
            (Some(id), _) => Ok(DocumentRef {
                document_type: DocumentType::Invoice,
                document_id: id,
            }),
            (None, Some(id)) => Ok(DocumentRef {
                document_type: DocumentType::Quote,
                document_id: id,
            }),
            (None, None) => Err(AppError::InternalError(anyhow::anyhow!(
                "Signature request {} is not linked to a document",
                self.signature_request_id
            ))),
        }
    }

    /// Cancellation wins over expiry: a cancelled request past its expiry is still cancelled.
    pub fn signing_state(&self, now: DateTime<Utc>) -> SigningState {
        match self.status {
            SignatureStatus::Signed => SigningState::Signed,
            SignatureStatus::Cancelled => SigningState::Cancelled,
            SignatureStatus::Expired => SigningState::Expired,
            SignatureStatus::Pending if self.expires_utc <= now => SigningState::Lapsed,
            SignatureStatus::Pending => SigningState::Open,
        }
    }

    /// Status as a reader should see it, without persisting lapsed expiry.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SignatureStatus {
        match self.signing_state(now) {
            SigningState::Lapsed => SignatureStatus::Expired,
            _ => self.status,
        }
    }
}

/// Captured signature. One per request.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Signature {
    pub signature_id: Uuid,
    pub signature_request_id: Uuid,
    pub image_ref: String,
    pub consent_given: bool,
    pub consent_text: String,
    pub signer_ip: Option<String>,
    pub signer_user_agent: Option<String>,
    pub signed_utc: DateTime<Utc>,
}

/// Signature submission from the signing page.
#[derive(Debug, Clone)]
pub struct SubmitSignature {
    pub image: String,
    pub consent: bool,
    pub consent_text: Option<String>,
}

/// Client details recorded alongside a signature.
#[derive(Debug, Clone, Default)]
pub struct SignerContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(status: SignatureStatus, expires_in: Duration) -> SignatureRequest {
        let now = Utc::now();
        SignatureRequest {
            signature_request_id: Uuid::new_v4(),
            invoice_id: Some(Uuid::new_v4()),
            quote_id: None,
            token: "ab".repeat(32),
            signer_email: "signer@example.com".to_string(),
            signer_name: None,
            status,
            expires_utc: now + expires_in,
            viewed_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn pending_past_expiry_is_lapsed() {
        let now = Utc::now();
        let lapsed = request(SignatureStatus::Pending, Duration::seconds(-1));
        assert_eq!(lapsed.signing_state(now), SigningState::Lapsed);
        assert_eq!(lapsed.effective_status(now), SignatureStatus::Expired);

        let open = request(SignatureStatus::Pending, Duration::days(7));
        assert_eq!(open.signing_state(now), SigningState::Open);
        assert_eq!(open.effective_status(now), SignatureStatus::Pending);
    }

    #[test]
    fn cancelled_takes_precedence_over_expiry() {
        let now = Utc::now();
        let cancelled = request(SignatureStatus::Cancelled, Duration::days(-3));
        assert_eq!(cancelled.signing_state(now), SigningState::Cancelled);
        assert_eq!(cancelled.effective_status(now), SignatureStatus::Cancelled);
    }

    #[test]
    fn signed_stays_signed_after_expiry() {
        let now = Utc::now();
        let signed = request(SignatureStatus::Signed, Duration::days(-1));
        assert_eq!(signed.signing_state(now), SigningState::Signed);
        assert!(signed.status.is_terminal());
    }

    #[test]
    fn document_ref_follows_link() {
        let mut req = request(SignatureStatus::Pending, Duration::days(1));
        assert_eq!(
            req.document_ref().unwrap().document_type,
            DocumentType::Invoice
        );

        let quote_id = Uuid::new_v4();
        req.invoice_id = None;
        req.quote_id = Some(quote_id);
        let doc = req.document_ref().unwrap();
        assert_eq!(doc.document_type, DocumentType::Quote);
        assert_eq!(doc.document_id, quote_id);
    }

    #[test]
    fn unlinked_request_is_an_internal_error() {
        let mut req = request(SignatureStatus::Pending, Duration::days(1));
        req.invoice_id = None;
        req.quote_id = None;
        assert!(matches!(
            req.document_ref(),
            Err(AppError::InternalError(_))
        ));
    }

    #[test]
    fn status_uses_uppercase_wire_names() {
        assert_eq!(
            serde_json::to_value(SignatureStatus::Cancelled).unwrap(),
            "CANCELLED"
        );
        assert!(SignatureStatus::try_from("pending".to_string()).is_err());
    }
}
