use crate::config::{MailMode, MailSettings};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Development mailer: logs recipient and subject, never the body.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "Mail delivered to log");
        Ok(())
    }
}

/// Sends through a transactional mail API: `POST {api_base_url}/email`.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
    sender: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

impl HttpMailer {
    pub fn new(settings: &MailSettings) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/email", settings.api_base_url.trim_end_matches('/')),
            api_token: settings.api_token.clone(),
            sender: settings.sender.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let body = SendEmailRequest {
            from: &self.sender,
            to: &message.to,
            subject: &message.subject,
            text_body: &message.text_body,
        };
        self.client
            .post(&self.endpoint)
            .header("X-Api-Token", &self.api_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        info!(to = %message.to, subject = %message.subject, "Mail sent");
        Ok(())
    }
}

pub fn build_mailer(settings: &MailSettings) -> Result<Arc<dyn Mailer>, MailError> {
    Ok(match settings.mode {
        MailMode::Log => Arc::new(LogMailer),
        MailMode::Http => Arc::new(HttpMailer::new(settings)?),
    })
}
