//! Application startup and lifecycle management.

use crate::config::BillingDocsConfig;
use crate::handlers::{company, documents, health, payments, quotes, series, signatures};
use crate::services::{
    init_metrics, ArtifactStore, Database, DocumentService, ExpirySweeper, LocalStorage, Notifier,
    SequenceAllocator, SignatureService,
};
use crate::services::signatures::MAX_SUBMIT_BODY_BYTES;
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingDocsConfig,
    pub db: Arc<Database>,
    pub allocator: SequenceAllocator,
    pub documents: DocumentService,
    pub signatures: SignatureService,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingDocsConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingDocsConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: BillingDocsConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let storage: Arc<dyn ArtifactStore> = Arc::new(
            LocalStorage::new(&config.storage.local_path)
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        path = %config.storage.local_path,
                        "Failed to initialize local storage"
                    );
                    e
                })?,
        );

        let notifier = Notifier::from_config(&config.smtp).map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize mailer");
            AppError::ConfigError(anyhow::anyhow!("Mailer configuration: {}", e))
        })?;

        let allocator = SequenceAllocator::new(db.pool().clone());
        let documents = DocumentService::new(db.clone(), allocator.clone());
        let signatures = SignatureService::new(
            db.clone(),
            storage,
            notifier,
            config.signatures.ttl_days,
            config.signatures.public_base_url.clone(),
        );

        let state = AppState {
            config: config.clone(),
            db,
            allocator,
            documents,
            signatures,
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Billing docs service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweeper = ExpirySweeper::new(
            self.state.db.pool().clone(),
            Duration::from_secs(self.state.config.sweeper.interval_secs),
        );
        let sweeper_handle = sweeper.spawn();

        let router = router(self.state);

        tracing::info!(
            service = "billing-docs-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, router).await;

        if let Some(handle) = sweeper_handle {
            handle.abort();
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

fn request_span(request: &Request) -> tracing::Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
        company_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
    )
}

/// REST surface. Signing endpoints are public; everything else needs a tenant.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_endpoint))
        .route(
            "/company",
            get(company::get_company).put(company::upsert_company),
        )
        .route("/series", get(series::list_series))
        .route("/series/:document_type/:series", put(series::configure_series))
        .route("/documents/:document_type", post(documents::create_document))
        .route(
            "/documents/:document_type/:id",
            get(documents::get_document).put(documents::update_document),
        )
        .route(
            "/documents/:document_type/:id/signatures",
            get(documents::list_document_signatures),
        )
        .route(
            "/invoices/:id/payments",
            post(payments::register_payment).get(payments::list_payments),
        )
        .route("/invoices/:id/void", post(payments::void_invoice))
        .route("/quotes/:id", axum::routing::delete(quotes::delete_quote))
        .route("/quotes/:id/convert", post(quotes::convert_quote))
        .route("/quotes/:id/status", post(quotes::change_quote_status))
        .route("/signatures/request", post(signatures::request_signature))
        .route("/signatures/validate/:token", get(signatures::validate_token))
        .route(
            "/signatures/submit",
            post(signatures::submit_signature).layer(DefaultBodyLimit::max(MAX_SUBMIT_BODY_BYTES)),
        )
        .route("/signatures/status/:token", get(signatures::signature_status))
        .route("/signatures/:id/cancel", post(signatures::cancel_signature))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
