use crate::dtos::DocumentResponse;
use crate::models::{DocumentRef, DocumentType, SignatureRequest, SignatureStatus, SubmitSignature};
use crate::services::signatures::{
    SignatureReceipt, SignatureRequestCreated, SignatureStatusReport, SigningView,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SignatureRequestBody {
    pub document_type: DocumentType,
    pub document_id: Uuid,

    #[validate(email(message = "Invalid email format"))]
    pub signer_email: String,

    #[validate(length(max = 255))]
    pub signer_name: Option<String>,
}

impl SignatureRequestBody {
    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef {
            document_type: self.document_type,
            document_id: self.document_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignatureRequestResponse {
    pub signature_request_id: Uuid,
    pub token: String,
    pub signing_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_url: Option<String>,
    pub status: SignatureStatus,
    pub expires_utc: DateTime<Utc>,
}

impl From<SignatureRequestCreated> for SignatureRequestResponse {
    fn from(created: SignatureRequestCreated) -> Self {
        Self {
            signature_request_id: created.request.signature_request_id,
            token: created.request.token,
            signing_path: created.signing_path,
            signing_url: created.signing_url,
            status: created.request.status,
            expires_utc: created.request.expires_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SigningViewResponse {
    pub signature_request_id: Uuid,
    pub signer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
    pub status: SignatureStatus,
    pub expires_utc: DateTime<Utc>,
    pub viewed_utc: Option<DateTime<Utc>>,
    pub document: DocumentResponse,
}

impl SigningViewResponse {
    pub fn new(view: SigningView, today: NaiveDate) -> Self {
        Self {
            signature_request_id: view.request.signature_request_id,
            signer_email: view.request.signer_email,
            signer_name: view.request.signer_name,
            status: view.request.status,
            expires_utc: view.request.expires_utc,
            viewed_utc: view.request.viewed_utc,
            document: DocumentResponse::new(view.document, today),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitSignatureBody {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    /// Base64 PNG, optionally as a `data:` URL.
    #[validate(length(min = 1, message = "Signature image is required"))]
    pub signature_image: String,

    #[serde(default)]
    pub consent: bool,

    #[validate(length(max = 2000))]
    pub consent_text: Option<String>,
}

impl From<SubmitSignatureBody> for SubmitSignature {
    fn from(body: SubmitSignatureBody) -> Self {
        Self {
            image: body.signature_image,
            consent: body.consent,
            consent_text: body.consent_text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignatureReceiptResponse {
    pub signature_request_id: Uuid,
    pub signature_id: Uuid,
    pub status: SignatureStatus,
    pub signed_utc: DateTime<Utc>,
}

impl From<SignatureReceipt> for SignatureReceiptResponse {
    fn from(receipt: SignatureReceipt) -> Self {
        Self {
            signature_request_id: receipt.request.signature_request_id,
            signature_id: receipt.signature.signature_id,
            status: receipt.request.status,
            signed_utc: receipt.signature.signed_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignatureStatusResponse {
    pub signature_request_id: Uuid,
    pub status: SignatureStatus,
    pub expires_utc: DateTime<Utc>,
    pub viewed_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_utc: Option<DateTime<Utc>>,
}

impl From<SignatureStatusReport> for SignatureStatusResponse {
    fn from(report: SignatureStatusReport) -> Self {
        Self {
            signature_request_id: report.request.signature_request_id,
            status: report.status,
            expires_utc: report.request.expires_utc,
            viewed_utc: report.request.viewed_utc,
            signed_utc: report.signed_utc,
        }
    }
}

/// Tenant-facing summary. The token is only returned when the request is created.
#[derive(Debug, Serialize)]
pub struct SignatureRequestSummary {
    pub signature_request_id: Uuid,
    pub signer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
    pub status: SignatureStatus,
    pub expires_utc: DateTime<Utc>,
    pub viewed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl SignatureRequestSummary {
    pub fn new(request: SignatureRequest, now: DateTime<Utc>) -> Self {
        Self {
            status: request.effective_status(now),
            signature_request_id: request.signature_request_id,
            signer_email: request.signer_email,
            signer_name: request.signer_name,
            expires_utc: request.expires_utc,
            viewed_utc: request.viewed_utc,
            created_utc: request.created_utc,
        }
    }
}
