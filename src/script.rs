//! Script generation through the Anthropic Messages API.
//!
//! Turns a user prompt into plain spoken text. One request per prompt,
//! no retries; an empty or malformed answer is an error for the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{AnthropicConfig, ApiKey};
use crate::error::{Result, StudioError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// User input that is non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Remote text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_script(&self, prompt: &Prompt) -> Result<String>;
}

pub struct AnthropicScriptGenerator {
    client: Client,
    api_url: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    api_key: ApiKey,
}

impl AnthropicScriptGenerator {
    /// Fails with `Configuration` when no credential is present. Performs no I/O.
    pub fn new(config: &AnthropicConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StudioError::Configuration(format!(
                "missing API key: {} not found in environment variables",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudioError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicScriptGenerator {
    async fn generate_script(&self, prompt: &Prompt) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": self.system_prompt,
            "messages": [
                { "role": "user", "content": prompt.as_str() }
            ]
        });

        let url = format!("{}/v1/messages", self.api_url);
        debug!("Requesting script from model '{}'", self.model);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    StudioError::Generation(format!("cannot connect to {}", self.api_url))
                } else if e.is_timeout() {
                    StudioError::Generation("request timed out".into())
                } else {
                    StudioError::Generation(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(StudioError::Generation(format!(
                "service returned status {status}: {}",
                detail.trim()
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| StudioError::Generation(format!("failed to parse response: {e}")))?;

        let script = first_text_segment(&data)?;
        info!("Generated script: {} chars", script.len());
        Ok(script)
    }
}

/// Text of the first content block, exactly as the service returned it.
fn first_text_segment(data: &serde_json::Value) -> Result<String> {
    let first = data["content"]
        .as_array()
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| StudioError::Generation("response contained no content".into()))?;

    first["text"]
        .as_str()
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| StudioError::Generation("first content block has no text".into()))
}
