//! Database service for billing-docs-service.

use crate::models::{Company, UpsertCompany};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// SQLSTATE codes for transient contention that a caller may retry.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Map a sqlx error to the service taxonomy.
///
/// Unique violations and lock contention become `Conflict`; everything else is a
/// `DatabaseError`.
pub fn classify_db_error(err: sqlx::Error, context: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(anyhow::anyhow!("{}: duplicate record", context));
        }
        if matches!(
            db_err.code().as_deref(),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE)
        ) {
            return AppError::Conflict(anyhow::anyhow!(
                "{}: concurrent update in progress, retry the request",
                context
            ));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, err))
}

/// Closure form of [`classify_db_error`] for `map_err`.
pub fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |err| classify_db_error(err, context)
}

/// True when `err` violates the given named constraint.
pub fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-docs-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Company settings
    // -------------------------------------------------------------------------

    /// Get a company's billing settings.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn get_company(&self, company_id: Uuid) -> Result<Option<Company>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_company"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            r#"
            SELECT company_id, name, email, tax_rate, currency, invoice_series, quote_series,
                created_utc, updated_utc
            FROM companies
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get company"))?;

        timer.observe_duration();

        Ok(company)
    }

    /// Get a company or fail with `NotFound`.
    pub async fn require_company(&self, company_id: Uuid) -> Result<Company, AppError> {
        self.get_company(company_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Company {} has no billing settings",
                company_id
            ))
        })
    }

    /// Create or replace a company's billing settings.
    #[instrument(skip(self, input), fields(company_id = %company_id))]
    pub async fn upsert_company(
        &self,
        company_id: Uuid,
        input: &UpsertCompany,
    ) -> Result<Company, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_company"])
            .start_timer();

        let company = sqlx::query_as::<_, Company>(
            r#"
            INSERT INTO companies (company_id, name, email, tax_rate, currency, invoice_series, quote_series)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (company_id) DO UPDATE
            SET name = EXCLUDED.name,
                email = EXCLUDED.email,
                tax_rate = EXCLUDED.tax_rate,
                currency = EXCLUDED.currency,
                invoice_series = EXCLUDED.invoice_series,
                quote_series = EXCLUDED.quote_series,
                updated_utc = NOW()
            RETURNING company_id, name, email, tax_rate, currency, invoice_series, quote_series,
                created_utc, updated_utc
            "#,
        )
        .bind(company_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.tax_rate)
        .bind(&input.currency)
        .bind(&input.invoice_series)
        .bind(&input.quote_series)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to save company settings"))?;

        timer.observe_duration();

        info!(company_id = %company.company_id, "Company settings saved");

        Ok(company)
    }
}
