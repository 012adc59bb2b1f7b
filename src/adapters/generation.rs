//! Content generation via an OpenAI-compatible chat completions API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::GenerationConfig;

use super::ContentGenerator;

const SYSTEM_PROMPT: &str = "You are a marketing copywriter for an automotive \
service business. Write short, friendly campaign emails. Keep every \
{{placeholder}} token from the instructions verbatim in your output so it can \
be personalized later.";

/// Chat-completions content generator.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, timeout: Duration) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("OPENAI_API_KEY is not configured")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build generation HTTP client")?;

        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt},
                ],
            }))
            .send()
            .await
            .context("Generation request failed")?
            .error_for_status()
            .context("Generation service rejected the request")?;

        let data: ChatResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        let content = data
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Generation response has no choices")?;

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "Hello {{customer_name}}"}}]
        }"#;

        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Hello {{customer_name}}");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = GenerationConfig {
            api_key: None,
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
        };

        assert!(OpenAiGenerator::new(&config, Duration::from_secs(5)).is_err());
    }
}
