//! Best-effort e-mail notifications.
//!
//! Delivery runs on a detached task with its own exponential backoff and never
//! reports back to the request that triggered it.

use crate::config::SmtpConfig;
use crate::services::metrics::NOTIFICATIONS_TOTAL;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl NotifyError {
    /// Whether retrying the same message could succeed.
    fn is_transient(&self) -> bool {
        matches!(self, NotifyError::SendFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// SMTP delivery through a STARTTLS relay.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;

        Ok(Self { from, transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("{}: {}", message.to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body_text.clone())
            .map_err(|e| NotifyError::Configuration(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

        tracing::info!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Mailer used when SMTP is disabled. Logs and counts instead of sending.
#[derive(Default)]
pub struct LogMailer {
    sent: AtomicU64,
}

impl LogMailer {
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "SMTP disabled, notification logged only"
        );
        Ok(())
    }
}

/// Events that produce an e-mail.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    SignatureRequested {
        to: String,
        signer_name: Option<String>,
        document_number: String,
        signing_link: String,
        expires_utc: DateTime<Utc>,
    },
    DocumentSigned {
        to: String,
        document_number: String,
        signer_email: String,
        signed_utc: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::SignatureRequested { .. } => "signature_requested",
            NotificationEvent::DocumentSigned { .. } => "document_signed",
        }
    }

    pub fn to_message(&self) -> EmailMessage {
        match self {
            NotificationEvent::SignatureRequested {
                to,
                signer_name,
                document_number,
                signing_link,
                expires_utc,
            } => EmailMessage {
                to: to.clone(),
                subject: format!("Please sign {}", document_number),
                body_text: format!(
                    "Hello {},\n\nYou have been asked to sign {}.\n\nOpen {} to review and sign.\nThis link expires on {}.\n",
                    signer_name.as_deref().unwrap_or("there"),
                    document_number,
                    signing_link,
                    expires_utc.format("%Y-%m-%d %H:%M UTC"),
                ),
            },
            NotificationEvent::DocumentSigned {
                to,
                document_number,
                signer_email,
                signed_utc,
            } => EmailMessage {
                to: to.clone(),
                subject: format!("{} has been signed", document_number),
                body_text: format!(
                    "{} was signed by {} on {}.\n",
                    document_number,
                    signer_email,
                    signed_utc.format("%Y-%m-%d %H:%M UTC"),
                ),
            },
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    max_elapsed: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            max_elapsed: Duration::from_secs(60),
        }
    }

    /// SMTP when enabled, otherwise a logging mailer.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let mailer: Arc<dyn Mailer> = if config.enabled {
            Arc::new(SmtpMailer::new(config)?)
        } else {
            Arc::new(LogMailer::default())
        };
        Ok(Self::new(mailer))
    }

    /// Deliver `event` in the background. Failures are logged and counted only.
    pub fn dispatch(&self, event: NotificationEvent) -> tokio::task::JoinHandle<()> {
        let mailer = self.mailer.clone();
        let max_elapsed = self.max_elapsed;

        tokio::spawn(async move {
            let kind = event.kind();
            let message = event.to_message();
            let policy = ExponentialBackoff {
                max_elapsed_time: Some(max_elapsed),
                ..Default::default()
            };

            let result = retry(policy, || async {
                mailer.send(&message).await.map_err(|e| {
                    if e.is_transient() {
                        tracing::debug!(error = %e, kind, "Notification attempt failed, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            })
            .await;

            match result {
                Ok(()) => {
                    NOTIFICATIONS_TOTAL.with_label_values(&[kind, "sent"]).inc();
                }
                Err(e) => {
                    NOTIFICATIONS_TOTAL.with_label_values(&[kind, "failed"]).inc();
                    tracing::warn!(error = %e, kind, to = %message.to, "Notification dropped");
                }
            }
        })
    }
}
