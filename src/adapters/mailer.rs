//! Brevo transactional email client.
//!
//! Sends one message per request and classifies failures into transient
//! (timeouts, 429, 5xx) and permanent (everything else) so the dispatcher
//! can decide whether to retry.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::MailerConfig;

use super::{DeliveryError, DeliveryReceipt, EmailDelivery, SendRequest};

/// Transactional email delivery via the Brevo HTTP API.
pub struct BrevoMailer {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    sender_email: String,
    sender_name: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId")]
    message_id: String,
}

impl BrevoMailer {
    pub fn new(config: &MailerConfig, timeout: Duration) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("BREVO_API_KEY is not configured")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build mailer HTTP client")?;

        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
        })
    }
}

#[async_trait]
impl EmailDelivery for BrevoMailer {
    async fn send(&self, request: &SendRequest) -> Result<DeliveryReceipt, DeliveryError> {
        let url = format!("{}/smtp/email", self.api_url);

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&json!({
                "sender": {"name": self.sender_name, "email": self.sender_email},
                "to": [{"email": request.recipient_email, "name": request.recipient_name}],
                "subject": request.subject,
                "htmlContent": request.html_body,
                "textContent": request.text_body,
                "tags": request.tags,
                "headers": {"X-Idempotency-Key": request.idempotency_key},
            }))
            .send()
            .await
            // Connect errors and timeouts are worth retrying
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("{}: {}", status, body.trim());

            return if status.is_server_error() || status.as_u16() == 429 {
                Err(DeliveryError::Transient(reason))
            } else {
                // Invalid recipient, rejected content, auth failures
                Err(DeliveryError::Permanent(reason))
            };
        }

        let data: SendResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transient(format!("unreadable send response: {}", e)))?;

        Ok(DeliveryReceipt {
            message_id: data.message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_response_parsing() {
        let json = r#"{"messageId": "<202501.123@smtp-relay>"}"#;
        let parsed: SendResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.message_id, "<202501.123@smtp-relay>");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = MailerConfig {
            api_key: None,
            api_url: "https://api.brevo.com/v3".to_string(),
            sender_email: "noreply@example.com".to_string(),
            sender_name: "Smart Campaigns".to_string(),
        };

        assert!(BrevoMailer::new(&config, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_delivery_error_kinds() {
        assert!(DeliveryError::Transient("503".to_string()).is_transient());
        assert!(!DeliveryError::Permanent("bad address".to_string()).is_transient());
    }
}
