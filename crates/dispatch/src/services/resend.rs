//! Resend API client for transactional ticket emails.
//!
//! # API Reference
//!
//! - Base URL: `https://api.resend.com`
//! - Authentication: API key via `Authorization: Bearer <key>`
//! - Send endpoint: `POST /emails`, returns `{"id": "..."}` on success

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ResendConfig;
use crate::dispatch::{Mailer, MailerError, OutboundEmail, SentEmail};

/// Resend API base URL.
const BASE_URL: &str = "https://api.resend.com";

/// Errors that can occur when interacting with the Resend API.
#[derive(Debug, Error)]
pub enum ResendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by Resend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Unauthorized (invalid API key).
    #[error("Unauthorized: invalid API key")]
    Unauthorized,

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Send-email request body.
#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Send-email response body.
#[derive(Debug, Deserialize)]
pub struct SendEmailResponse {
    /// Provider-assigned message identifier.
    pub id: String,
}

/// Resend API client.
///
/// One email per purchaser per dispatch cycle; the sender identity is fixed
/// at construction from configuration.
#[derive(Clone)]
pub struct ResendClient {
    inner: Arc<ResendClientInner>,
}

struct ResendClientInner {
    client: reqwest::Client,
    from: String,
}

impl ResendClient {
    /// Create a new Resend API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &ResendConfig) -> Result<Self, ResendError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.api_key.expose_secret());
        let mut auth_header = HeaderValue::from_str(&auth_value)
            .map_err(|e| ResendError::Parse(format!("Invalid API key format: {e}")))?;
        auth_header.set_sensitive(true);
        headers.insert("Authorization", auth_header);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(ResendClientInner {
                client,
                from: config.from.clone(),
            }),
        })
    }

    /// Send one email and return the provider message identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects the message.
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<SendEmailResponse, ResendError> {
        let body = SendEmailRequest {
            from: &self.inner.from,
            to: [to],
            subject,
            html,
        };

        let response = self
            .inner
            .client
            .post(format!("{BASE_URL}/emails"))
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ResendError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ResendError::Parse(format!("Failed to parse response: {e}")));
        }

        Err(self.parse_error(response).await)
    }

    /// Parse error response from the Resend API.
    async fn parse_error(&self, response: reqwest::Response) -> ResendError {
        let status = response.status().as_u16();

        // Check for rate limiting
        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return ResendError::RateLimited(retry_after);
        }

        // Check for unauthorized
        if status == 401 || status == 403 {
            return ResendError::Unauthorized;
        }

        // Try to parse error message from response body
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        ResendError::Api { status, message }
    }
}

#[async_trait]
impl Mailer for ResendClient {
    async fn send(&self, email: &OutboundEmail) -> Result<SentEmail, MailerError> {
        let response = self
            .send_email(email.to.as_str(), &email.subject, &email.html)
            .await
            .map_err(|e| MailerError(e.to_string()))?;

        Ok(SentEmail {
            message_id: response.id,
        })
    }
}

impl std::fmt::Debug for ResendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendClient")
            .field("from", &self.inner.from)
            .finish_non_exhaustive()
    }
}
