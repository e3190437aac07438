//! Natural-language assistant boundary.
//!
//! Translates a question plus the current options catalog into a
//! `ReportConfig`. The translation itself is an opaque external service
//! (an OpenAI-compatible chat endpoint); the retry-on-execution-failure
//! loop lives in the ask handler, not here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AssistantConfig;
use crate::models::ReportConfig;
use crate::options::OptionsCatalog;

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Produce a report configuration for the question. `previous_error`
    /// carries the execution error from the prior attempt, if any.
    async fn translate(
        &self,
        question: &str,
        catalog: &OptionsCatalog,
        previous_error: Option<&str>,
    ) -> Result<ReportConfig>;
}

pub struct HttpAssistant {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpAssistant {
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("funnelboard/0.1.0")
            .build()
            .context("failed to build HTTP client for assistant")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn system_prompt(catalog: &OptionsCatalog) -> String {
        let catalog_json = serde_json::to_string(catalog).unwrap_or_default();
        format!(
            "You translate marketing-analytics questions into a report \
             configuration JSON object with fields reportArchetype \
             (\"outcome_analysis\" or \"engagement_analysis\"), dataConfig, \
             chart, and kpiCards. Only use stage names, countries, channels, \
             event names and signals from this catalog: {catalog_json}. \
             Respond with the JSON object only."
        )
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn translate(
        &self,
        question: &str,
        catalog: &OptionsCatalog,
        previous_error: Option<&str>,
    ) -> Result<ReportConfig> {
        let mut messages = vec![
            json!({ "role": "system", "content": Self::system_prompt(catalog) }),
            json!({ "role": "user", "content": question }),
        ];
        if let Some(error) = previous_error {
            messages.push(json!({
                "role": "user",
                "content": format!(
                    "The previous configuration failed to execute with: {error}. \
                     Produce a corrected configuration."
                )
            }));
        }

        debug!("Requesting report configuration from assistant");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "response_format": { "type": "json_object" }
            }))
            .send()
            .await
            .context("assistant request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("assistant returned {status}: {body}"));
        }

        let body: Value = response
            .json()
            .await
            .context("failed to decode assistant response")?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("assistant response missing message content"))?;

        serde_json::from_str(content).context("assistant did not return a valid report config")
    }
}
