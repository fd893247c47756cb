pub mod company;
pub mod documents;
pub mod health;
pub mod payments;
pub mod quotes;
pub mod series;
pub mod signatures;

use crate::services::metrics::ERRORS_TOTAL;
use service_core::error::AppError;

/// Count a failed request by error kind.
pub(crate) fn record_error(err: &AppError) {
    ERRORS_TOTAL.with_label_values(&[err.code()]).inc();
    if err.status_code().is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
}
