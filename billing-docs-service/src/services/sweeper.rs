//! Background persistence of time-based expiry.
//!
//! Reads already derive `expired` from dates; the sweeper only makes the
//! stored status catch up so counts and filters see it.

use crate::services::database::db_error;
use crate::services::metrics::{DB_QUERY_DURATION, SIGNATURE_EVENTS_TOTAL};
use chrono::{NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

/// Rows moved to expired by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub signature_requests: u64,
    pub quotes: u64,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    pool: PgPool,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(pool: PgPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Run forever on the configured interval. A zero interval disables it.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            info!("Expiry sweeper disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once(Utc::now().date_naive()).await {
                    error!(error = %e, "Expiry sweep failed");
                }
            }
        }))
    }

    /// Expire pending signature requests past `expires_utc` and live quotes
    /// whose validity date is before `today`, across all companies.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, today: NaiveDate) -> Result<SweepReport, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expiry_sweep"])
            .start_timer();

        let signature_requests = sqlx::query(
            r#"
            UPDATE signature_requests
            SET status = 'EXPIRED', updated_utc = NOW()
            WHERE status = 'PENDING' AND expires_utc <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to expire signature requests"))?
        .rows_affected();

        let quotes = sqlx::query(
            r#"
            UPDATE quotes
            SET status = 'expired', updated_utc = NOW()
            WHERE status IN ('pending', 'approved') AND valid_until < $1
            "#,
        )
        .bind(today)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to expire quotes"))?
        .rows_affected();

        timer.observe_duration();

        if signature_requests > 0 {
            SIGNATURE_EVENTS_TOTAL
                .with_label_values(&["expired"])
                .inc_by(signature_requests as f64);
        }
        if signature_requests > 0 || quotes > 0 {
            info!(
                signature_requests = signature_requests,
                quotes = quotes,
                "Expiry sweep persisted lapsed records"
            );
        }

        Ok(SweepReport {
            signature_requests,
            quotes,
        })
    }
}
