pub mod company;
pub mod documents;
pub mod payments;
pub mod signatures;

pub use company::{CompanyRequest, ConfigureSeriesRequest, SeriesResponse};
pub use documents::{DocumentRequest, DocumentResponse, LineRequest, QuoteStatusRequest};
pub use payments::{PaymentListResponse, PaymentRequest, PaymentResponse};
pub use signatures::{
    SignatureReceiptResponse, SignatureRequestBody, SignatureRequestResponse,
    SignatureRequestSummary, SignatureStatusResponse, SigningViewResponse, SubmitSignatureBody,
};
