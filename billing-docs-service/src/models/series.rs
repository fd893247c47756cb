//! Numbering series counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::DocumentType;

/// Counter row for one (company, document type, series) key.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SeriesCounter {
    pub company_id: Uuid,
    #[sqlx(try_from = "String")]
    pub document_type: DocumentType,
    pub series: String,
    pub last_number: i64,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl SeriesCounter {
    /// Number the next allocation will return while the series stays active.
    pub fn next_number(&self) -> i64 {
        self.last_number + 1
    }
}
