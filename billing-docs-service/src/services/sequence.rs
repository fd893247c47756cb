//! Sequential document numbering.
//!
//! One counter row per (company, document type, series). A number is handed out
//! by a single atomic upsert in its own short transaction, so the row lock is
//! never held while the document itself is written. A document insert that
//! fails after allocation leaves a gap; numbers are never reused.

use crate::models::{DocumentType, SeriesCounter};
use crate::services::database::db_error;
use crate::services::metrics::{DB_QUERY_DURATION, NUMBERS_ALLOCATED_TOTAL};
use service_core::error::AppError;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Upper bound on waiting for another allocator holding the counter row.
const LOCK_TIMEOUT: &str = "5s";

#[derive(Clone)]
pub struct SequenceAllocator {
    pool: PgPool,
}

impl SequenceAllocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reserve the next number for the key. The first call for a key returns 1.
    ///
    /// Fails with `InvalidState` when the series is deactivated and with
    /// `Conflict` on lock timeout, deadlock or serialization failure.
    #[instrument(skip(self), fields(company_id = %company_id, document_type = %document_type))]
    pub async fn next_number(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        series: &str,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["allocate_number"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin allocation"))?;

        sqlx::query(&format!("SET LOCAL lock_timeout = '{}'", LOCK_TIMEOUT))
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to configure allocation"))?;

        let allocated: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO series_counters (company_id, document_type, series, last_number)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (company_id, document_type, series) DO UPDATE
            SET last_number = series_counters.last_number + 1,
                updated_utc = NOW()
            WHERE series_counters.active
            RETURNING last_number
            "#,
        )
        .bind(company_id)
        .bind(document_type.as_str())
        .bind(series)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to allocate document number"))?;

        let Some(number) = allocated else {
            tx.rollback()
                .await
                .map_err(db_error("Failed to roll back allocation"))?;
            warn!(series = %series, "Allocation refused for inactive series");
            return Err(AppError::invalid_state(
                format!("Series '{}' is not active", series),
                "inactive",
            ));
        };

        tx.commit()
            .await
            .map_err(db_error("Failed to commit allocation"))?;

        timer.observe_duration();
        NUMBERS_ALLOCATED_TOTAL
            .with_label_values(&[document_type.as_str()])
            .inc();

        info!(series = %series, number = number, "Document number allocated");

        Ok(number)
    }

    /// Create or update a counter.
    ///
    /// `starting_number` is the next number to hand out; it can only move the
    /// counter forward.
    #[instrument(skip(self), fields(company_id = %company_id, document_type = %document_type))]
    pub async fn configure_series(
        &self,
        company_id: Uuid,
        document_type: DocumentType,
        series: &str,
        active: bool,
        starting_number: Option<i64>,
    ) -> Result<SeriesCounter, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["configure_series"])
            .start_timer();

        let floor = starting_number.map(|n| n - 1).unwrap_or(0);

        let counter = sqlx::query_as::<_, SeriesCounter>(
            r#"
            INSERT INTO series_counters (company_id, document_type, series, last_number, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (company_id, document_type, series) DO UPDATE
            SET last_number = GREATEST(series_counters.last_number, EXCLUDED.last_number),
                active = EXCLUDED.active,
                updated_utc = NOW()
            RETURNING company_id, document_type, series, last_number, active, created_utc, updated_utc
            "#,
        )
        .bind(company_id)
        .bind(document_type.as_str())
        .bind(series)
        .bind(floor)
        .bind(active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::NotFound(anyhow::anyhow!(
                    "Company {} has no billing settings",
                    company_id
                ))
            }
            other => db_error("Failed to configure series")(other),
        })?;

        timer.observe_duration();

        info!(
            series = %counter.series,
            last_number = counter.last_number,
            active = counter.active,
            "Series configured"
        );

        Ok(counter)
    }

    /// List a company's counters.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn list_series(&self, company_id: Uuid) -> Result<Vec<SeriesCounter>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_series"])
            .start_timer();

        let counters = sqlx::query_as::<_, SeriesCounter>(
            r#"
            SELECT company_id, document_type, series, last_number, active, created_utc, updated_utc
            FROM series_counters
            WHERE company_id = $1
            ORDER BY document_type, series
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list series"))?;

        timer.observe_duration();

        Ok(counters)
    }
}
