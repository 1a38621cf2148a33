//! Remote oracle provider using OpenAI-compatible APIs
//!
//! Implements the EnrichmentOracle trait for remote LLM APIs via HTTP.
//! Supports any OpenAI-compatible endpoint with configurable URL, model,
//! and API key via environment variable.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RemoteOracleConfig;
use crate::error::{Result, SynapseError};
use crate::oracle::prompts::{ASSOCIATIONS_PROMPT, GIST_PROMPT};
use crate::oracle::provider::EnrichmentOracle;
use crate::oracle::types::{ActionTag, Directive, OracleError, StructuredExtraction};

/// Remote oracle using OpenAI-compatible HTTP APIs
#[derive(Debug)]
pub struct RemoteOracle {
    client: Client,
    config: RemoteOracleConfig,
    api_key: String,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

/// Message in the chat completion request
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

/// Choice in the chat completion response
#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// Message in the response choice
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// JSON representation of an extraction as the model returns it
#[derive(Debug, Deserialize)]
struct ExtractionJson {
    goal: String,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    actions: Vec<ActionJson>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionJson {
    verb: String,
    #[serde(default)]
    target: Option<String>,
}

impl RemoteOracle {
    /// Create a new remote oracle with the given configuration
    ///
    /// Reads the API key from the environment variable specified in
    /// `config.api_key_env`. Returns an error if it is not set.
    pub fn new(config: &RemoteOracleConfig, timeout: Duration) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            SynapseError::Config(format!("API key env var '{}' not set", config.api_key_env))
        })?;

        if config.api_url.trim().is_empty() {
            return Err(SynapseError::Config(
                "oracle.remote.api_url must be set for the remote provider".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SynapseError::Config(e.to_string()))?;

        info!(
            "RemoteOracle initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    async fn call_api(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You extract structured data and answer only with JSON.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.0,
            max_tokens: 512,
        };

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        debug!("Calling remote oracle at: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::Unavailable(format!(
                "API returned {status}: {error_text}"
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("Empty response".to_string()))
    }
}

/// Parse and validate the model's JSON answer.
fn parse_extraction(
    content: &str,
    directive: Directive,
) -> std::result::Result<StructuredExtraction, OracleError> {
    let json = strip_code_fence(content);
    let parsed: ExtractionJson = serde_json::from_str(json).map_err(|e| {
        OracleError::InvalidResponse(format!("Failed to parse extraction JSON: {e}"))
    })?;

    let extraction = StructuredExtraction {
        goal: parsed.goal.trim().to_lowercase(),
        tasks: parsed.tasks,
        actions: parsed
            .actions
            .into_iter()
            .map(|a| ActionTag {
                verb: a.verb,
                target: a.target,
            })
            .collect(),
        entities: parsed.entities,
        summary: parsed.summary.map(|s| s.trim().to_string()),
    };
    extraction.validate(directive)?;
    Ok(extraction)
}

/// Models often wrap JSON in a markdown fence; take what is inside.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl EnrichmentOracle for RemoteOracle {
    async fn extract(
        &self,
        text: &str,
        directive: Directive,
    ) -> std::result::Result<StructuredExtraction, OracleError> {
        let template = match directive {
            Directive::Associations => ASSOCIATIONS_PROMPT,
            Directive::Gist => GIST_PROMPT,
        };
        let prompt = template.replace("{text}", text);
        let response = self.call_api(&prompt).await?;
        debug!("Extraction response: {}", response);
        parse_extraction(&response, directive)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
