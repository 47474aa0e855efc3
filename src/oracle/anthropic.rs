//! Estimate oracle backed by the Anthropic Messages API.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{EstimateOracle, OracleError, OracleRequest};

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 256;

/// Connection settings of the HTTP oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OracleConfig {
    /// Read `ANTHROPIC_API_KEY`, `ORACLE_MODEL`, `ORACLE_BASE_URL` and `ORACLE_TIMEOUT_MS`.
    ///
    /// Returns `None` when no API key is set, which is the "not configured" state.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = non_blank("ANTHROPIC_API_KEY")?;
        let timeout = match non_blank("ORACLE_TIMEOUT_MS").map(|raw| raw.trim().parse::<u64>()) {
            Some(Ok(ms)) if ms > 0 => Duration::from_millis(ms),
            Some(_) => {
                warn!(
                    default_ms = DEFAULT_TIMEOUT.as_millis() as u64,
                    "invalid ORACLE_TIMEOUT_MS, using default"
                );
                DEFAULT_TIMEOUT
            }
            None => DEFAULT_TIMEOUT,
        };

        Some(Self {
            api_key,
            model: non_blank("ORACLE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: non_blank("ORACLE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }
}

/// [`EstimateOracle`] calling `POST {base_url}/v1/messages`.
#[derive(Clone)]
pub struct AnthropicOracle {
    http: Client,
    config: OracleConfig,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl AnthropicOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| OracleError::ClientBuilder { source })?;
        Ok(Self { http, config })
    }

    /// Build the oracle from the environment.
    ///
    /// A missing key or a client that cannot be built both leave the oracle unconfigured.
    pub fn from_env() -> Option<Self> {
        let Some(config) = OracleConfig::from_env() else {
            info!("ANTHROPIC_API_KEY not set, simulated participants use fallback estimates");
            return None;
        };

        match Self::new(config) {
            Ok(oracle) => {
                info!(model = %oracle.config.model, "estimate oracle configured");
                Some(oracle)
            }
            Err(err) => {
                warn!(error = %err, "estimate oracle disabled");
                None
            }
        }
    }

    fn body(&self, request: &OracleRequest) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "max_tokens": MAX_TOKENS,
            "system": request.system_prompt(),
            "messages": [
                { "role": "user", "content": request.user_prompt() }
            ],
        })
    }

    async fn complete(&self, request: OracleRequest) -> Result<String, OracleError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        debug!(persona = %request.persona.id, model = %self.config.model, "requesting estimate");

        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: MessagesResponse = response.json().await?;
        Ok(collect_text(payload))
    }
}

fn collect_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

impl EstimateOracle for AnthropicOracle {
    fn request(&self, request: OracleRequest) -> BoxFuture<'static, Result<String, OracleError>> {
        let oracle = self.clone();
        Box::pin(async move { oracle.complete(request).await })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::state::room::{Persona, Topic};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn missing_or_blank_key_means_not_configured() {
        assert!(OracleConfig::from_lookup(lookup(&[])).is_none());
        assert!(OracleConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "  ")])).is_none());
    }

    #[test]
    fn defaults_and_overrides() {
        let config = OracleConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "k")])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);

        let config = OracleConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("ORACLE_MODEL", "custom"),
            ("ORACLE_BASE_URL", "http://localhost:9000/"),
            ("ORACLE_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.model, "custom");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn bad_timeout_falls_back_to_default() {
        let config = OracleConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("ORACLE_TIMEOUT_MS", "soon"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn request_body_carries_prompts() {
        let oracle = AnthropicOracle::new(
            OracleConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "k")])).unwrap(),
        )
        .unwrap();
        let request = OracleRequest::new(
            Topic::new("Export CSV", "Add an export button"),
            Persona {
                id: "pm".into(),
                name: "Rosa".into(),
                role: "a product manager".into(),
                avatar_ref: String::new(),
            },
        );

        let body = oracle.body(&request);
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body["system"].as_str().unwrap().contains("Rosa"));
        assert!(
            body["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("Add an export button")
        );
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "{\"value\": 5," },
                { "type": "tool_use", "id": "x", "name": "y", "input": {} },
                { "type": "text", "text": " \"rationale\": \"ok\"}" }
            ]
        }))
        .unwrap();
        assert_eq!(
            collect_text(response),
            "{\"value\": 5, \"rationale\": \"ok\"}"
        );
    }
}
