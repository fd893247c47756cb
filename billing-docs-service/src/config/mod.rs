//! Configuration module for billing-docs-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct BillingDocsConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub signatures: SignatureConfig,
    pub sweeper: SweeperConfig,
    pub storage: StorageConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub ttl_days: i64,
    /// Prefix for absolute signing links, e.g. `https://billing.example.com`.
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Zero disables the sweeper.
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub local_path: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "billing@localhost".to_string(),
            from_name: "Billing".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl BillingDocsConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common = core_config::Config::load()?;
        if let Ok(environment) = env::var("ENVIRONMENT") {
            common.environment = match environment.to_lowercase().as_str() {
                "development" | "dev" => core_config::Environment::Development,
                "staging" => core_config::Environment::Staging,
                _ => core_config::Environment::Production,
            };
        }

        let smtp_defaults = SmtpConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "billing-docs-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2),
            },
            signatures: SignatureConfig {
                ttl_days: parse_env("SIGNATURE_TTL_DAYS", 7),
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .ok()
                    .map(|s| s.trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty()),
            },
            sweeper: SweeperConfig {
                interval_secs: parse_env("SWEEP_INTERVAL_SECS", 300),
            },
            storage: StorageConfig {
                local_path: env::var("STORAGE_LOCAL_PATH").unwrap_or_else(|_| "storage".to_string()),
            },
            smtp: SmtpConfig {
                enabled: parse_env("SMTP_ENABLED", false),
                host: env::var("SMTP_HOST").unwrap_or(smtp_defaults.host),
                port: parse_env("SMTP_PORT", smtp_defaults.port),
                user: env::var("SMTP_USER").unwrap_or_default(),
                password: Secret::new(env::var("SMTP_PASSWORD").unwrap_or_default()),
                from_email: env::var("SMTP_FROM_EMAIL").unwrap_or(smtp_defaults.from_email),
                from_name: env::var("SMTP_FROM_NAME").unwrap_or(smtp_defaults.from_name),
            },
        })
    }
}
