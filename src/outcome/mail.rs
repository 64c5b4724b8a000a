//! Mail transport for the EMAIL outcome.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP is not configured")]
    NotConfigured,

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A rendered email ready to hand to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;

    /// Whether the mail server answers. Probed once at supervisor start.
    async fn is_alive(&self) -> bool;
}

/// SMTP transport backed by lettre.
pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailTransport {
    pub fn new(host: &str, config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else {
            // Plain connection for local relays (Mailpit, MailHog)
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            host: host.to_string(),
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Build a single-part HTML message.
pub fn build_message(message: &MailMessage) -> Result<Message, MailError> {
    Message::builder()
        .from(parse_mailbox(&message.from)?)
        .to(parse_mailbox(&message.to)?)
        .subject(&message.subject)
        .header(ContentType::TEXT_HTML)
        .body(message.html.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let email = build_message(message)?;
        self.transport.send(email).await?;
        tracing::debug!(to = %message.to, subject = %message.subject, "Email sent");
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        match self.transport.test_connection().await {
            Ok(alive) => alive,
            Err(e) => {
                tracing::warn!(host = %self.host, error = %e, "SMTP connection test failed");
                false
            }
        }
    }
}

/// Used when no SMTP host is configured: every send fails.
pub struct DisabledMailTransport;

#[async_trait]
impl MailTransport for DisabledMailTransport {
    async fn send(&self, _message: &MailMessage) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }

    async fn is_alive(&self) -> bool {
        false
    }
}

/// Create the mail transport from configuration.
pub fn create_mail_transport(config: &SmtpConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    match config.host.as_deref() {
        Some(host) if !host.is_empty() => {
            tracing::info!(host = %host, port = config.port, tls = config.use_tls, "Creating SMTP transport");
            Ok(Arc::new(SmtpMailTransport::new(host, config)?))
        }
        _ => {
            tracing::info!("No SMTP host configured, email outcomes are disabled");
            Ok(Arc::new(DisabledMailTransport))
        }
    }
}
