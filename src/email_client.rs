use async_trait::async_trait;
use serde::Serialize;

use crate::configuration::EmailClientSettings;
use crate::error::{AppError, ValidationError};
use crate::validators::normalize_email;

/// Outbound transactional mail.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, recipient: &str, subject: &str, html_content: &str) -> Result<(), AppError>;
}

#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Ok(Self(normalize_email(s)?))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "Html")]
    html: &'a str,
}

/// HTTP client for the mail delivery API (`POST {base_url}/email`).
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderEmail, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sender,
        }
    }

    pub fn from_settings(settings: &EmailClientSettings) -> Result<Self, AppError> {
        let sender = SenderEmail::parse(&settings.sender_email)?;
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build email HTTP client: {}", e)))?;
        Ok(Self::new(settings.base_url.clone(), sender, http_client))
    }

    fn url(&self) -> String {
        format!("{}/email", self.base_url)
    }
}

#[async_trait]
impl EmailSender for EmailClient {
    async fn send_email(&self, recipient: &str, subject: &str, html_content: &str) -> Result<(), AppError> {
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: recipient,
            subject,
            html: html_content,
        };

        self.http_client
            .post(self.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send email");
                AppError::Internal(format!("Failed to send email: {}", e))
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!(error = %e, "Email service returned error");
                AppError::Internal(format!("Email service error: {}", e))
            })?;

        Ok(())
    }
}
