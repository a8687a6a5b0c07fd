//! Email dispatch boundary.
//!
//! The engine only ever calls [`Mailer::send`]; which provider actually
//! delivers is a deployment concern. The SMTP implementation mirrors the
//! production setup; [`MemoryMailer`] captures outbound mail for tests.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::error::{ErrorCode, ServiceError};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| {
                ServiceError::Internal(ErrorCode::Internal, format!("smtp relay setup: {e}"))
            })?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "smtp mailer initialized");
        Ok(Self {
            mailer,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), ServiceError> {
        let email = Message::builder()
            .from(self.from.parse().map_err(|e: lettre::address::AddressError| {
                ServiceError::Internal(ErrorCode::Internal, format!("from address: {e}"))
            })?)
            .to(to.parse().map_err(|e: lettre::address::AddressError| {
                ServiceError::BadRequest(ErrorCode::InvalidRequest, format!("to address: {e}"))
            })?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .map_err(|e| {
                ServiceError::Internal(ErrorCode::Internal, format!("message build: {e}"))
            })?;

        // SmtpTransport is blocking; keep it off the async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| {
                ServiceError::Internal(ErrorCode::Internal, format!("mail task join: {e}"))
            })?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to, subject = %subject, "email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(to = %to, error = %e, "email send failed");
                Err(ServiceError::Internal(
                    ErrorCode::EmailDispatchFailed,
                    e.to_string(),
                ))
            }
        }
    }
}

/// Captured outbound email.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Mailer that records instead of sending. Used by the test suite.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<SentEmail> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), ServiceError> {
        self.sent.lock().expect("mailer lock poisoned").push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}
