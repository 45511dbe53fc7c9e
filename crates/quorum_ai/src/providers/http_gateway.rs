//! HTTP Model Invocation Gateway.
//!
//! One [`ModelInvoker`] for every configured provider. Providers speak either
//! the OpenAI `/chat/completions` dialect (OpenAI, xAI, Gemini's compatibility
//! endpoint) or the Anthropic Messages API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use quorum_core::{ApiStyle, QuorumConfig};

use super::{ModelInvoker, ProviderError, split_qualified_id};
use crate::judge::truncate;
use crate::types::{ChatMessage, InvocationParams, MessageRole};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Anthropic requires `max_tokens` on every request.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_ERROR_BODY_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    api_style: ApiStyle,
    api_key: Option<String>,
}

/// Gateway over every provider declared in [`QuorumConfig::providers`].
pub struct HttpGateway {
    client: reqwest::Client,
    endpoints: HashMap<String, Endpoint>,
    request_timeout: Duration,
}

impl HttpGateway {
    /// Build from config, reading API keys from the environment.
    pub fn from_config(config: &QuorumConfig) -> Self {
        Self::with_key_lookup(config, |name| std::env::var(name).ok())
    }

    /// Build from config with an injectable environment lookup.
    pub fn with_key_lookup(config: &QuorumConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let endpoints = config
            .providers
            .iter()
            .map(|(name, p)| {
                let endpoint = Endpoint {
                    base_url: p.base_url.trim_end_matches('/').to_owned(),
                    api_style: p.api_style,
                    api_key: config.api_key_with(name, &lookup),
                };
                (name.clone(), endpoint)
            })
            .collect();

        // Whole-request bound, matching the per-call timeout.
        let request_timeout = Duration::from_secs(config.per_call_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoints,
            request_timeout,
        }
    }

    /// Upper bound on one HTTP request, connect through last body byte.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Whether `provider` is configured and has a non-empty API key.
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.endpoints
            .get(provider)
            .is_some_and(|e| e.api_key.is_some())
    }

    /// Providers that are configured but have no API key.
    pub fn providers_without_credentials(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .endpoints
            .iter()
            .filter(|(_, e)| e.api_key.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        missing.sort();
        missing
    }

    // -----------------------------------------------------------------------
    // Request bodies
    // -----------------------------------------------------------------------

    /// Returns `true` for reasoning models (o1, o3, o4) that reject
    /// `temperature` and use `max_completion_tokens`.
    fn is_reasoning_model(model: &str) -> bool {
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    fn openai_body<'a>(
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &InvocationParams,
    ) -> OpenAiRequest<'a> {
        let reasoning = Self::is_reasoning_model(model);
        OpenAiRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: if reasoning { None } else { params.max_tokens },
            max_completion_tokens: if reasoning { params.max_tokens } else { None },
            temperature: if reasoning { None } else { params.temperature },
        }
    }

    /// System messages move into the top-level `system` field.
    fn anthropic_body<'a>(
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &InvocationParams,
    ) -> AnthropicRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        AnthropicRequest {
            model,
            max_tokens: params
                .max_tokens
                .filter(|n| *n > 0)
                .unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            messages: messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            temperature: params.temperature,
        }
    }

    // -----------------------------------------------------------------------
    // Error mapping
    // -----------------------------------------------------------------------

    fn map_status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::InvalidKey,
            429 => ProviderError::RateLimit,
            408 | 504 => ProviderError::Timeout,
            404 => ProviderError::ModelUnavailable(format!(
                "{provider}: {}",
                truncate(body, MAX_ERROR_BODY_CHARS)
            )),
            _ => ProviderError::Other(format!(
                "{provider} API error {status}: {}",
                truncate(body, MAX_ERROR_BODY_CHARS)
            )),
        }
    }

    fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_connect() {
            ProviderError::Network(format!("Connection failed: {e}"))
        } else {
            ProviderError::Network(e.to_string())
        }
    }

    async fn send(
        &self,
        provider: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = request.send().await.map_err(Self::map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status_error(provider, status, &text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelInvoker for HttpGateway {
    async fn invoke(
        &self,
        qualified_id: &str,
        messages: &[ChatMessage],
        params: &InvocationParams,
    ) -> Result<String, ProviderError> {
        let (provider, model) = split_qualified_id(qualified_id)?;
        let endpoint = self
            .endpoints
            .get(provider)
            .ok_or_else(|| ProviderError::ModelUnavailable(qualified_id.to_owned()))?;
        let key = endpoint.api_key.as_deref().ok_or(ProviderError::InvalidKey)?;

        debug!(model = qualified_id, messages = messages.len(), "Invoking backend");

        match endpoint.api_style {
            ApiStyle::OpenAi => {
                let body = Self::openai_body(model, messages, params);
                let request = self
                    .client
                    .post(format!("{}/chat/completions", endpoint.base_url))
                    .bearer_auth(key)
                    .json(&body);
                let data: OpenAiResponse = self
                    .send(provider, request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| ProviderError::Other(format!("JSON parse error: {e}")))?;

                data.choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| ProviderError::Other(format!("No choices in {provider} response")))
            }
            ApiStyle::Anthropic => {
                let body = Self::anthropic_body(model, messages, params);
                let request = self
                    .client
                    .post(format!("{}/messages", endpoint.base_url))
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body);
                let data: AnthropicResponse = self
                    .send(provider, request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| ProviderError::Other(format!("Failed to parse response: {e}")))?;

                Ok(data
                    .content
                    .into_iter()
                    .filter(|b| b.block_type == "text")
                    .filter_map(|b| b.text)
                    .collect::<Vec<_>>()
                    .join(""))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn gateway_with(keys: &[(&str, &str)]) -> HttpGateway {
        let keys: HashMap<String, String> = keys
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        HttpGateway::with_key_lookup(&QuorumConfig::default(), |name| keys.get(name).cloned())
    }

    #[test]
    fn credentials_follow_environment() {
        let gw = gateway_with(&[("OPENAI_API_KEY", "sk-1"), ("XAI_API_KEY", "")]);
        assert!(gw.has_credentials("openai"));
        assert!(!gw.has_credentials("xai"));
        assert!(!gw.has_credentials("anthropic"));
        assert!(!gw.has_credentials("nowhere"));
        assert_eq!(gw.providers_without_credentials(), ["anthropic", "google", "xai"]);
    }

    #[test]
    fn request_timeout_follows_config() {
        let config = QuorumConfig {
            per_call_timeout_secs: 45,
            ..Default::default()
        };
        let gateway = HttpGateway::with_key_lookup(&config, |_| None);
        assert_eq!(gateway.request_timeout(), Duration::from_secs(45));

        let zero = QuorumConfig {
            per_call_timeout_secs: 0,
            ..Default::default()
        };
        let gateway = HttpGateway::with_key_lookup(&zero, |_| None);
        assert_eq!(gateway.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn openai_body_for_standard_model() {
        let messages = [ChatMessage::system("terse"), ChatMessage::user("hi")];
        let body = HttpGateway::openai_body("gpt-4o", &messages, &InvocationParams::new(0.7, 100));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 100);
        assert!(json.get("max_completion_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn openai_body_for_reasoning_model() {
        let messages = [ChatMessage::user("prove it")];
        let body = HttpGateway::openai_body("o3", &messages, &InvocationParams::new(0.7, 100));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_completion_tokens"], 100);
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn anthropic_body_lifts_system_messages() {
        let messages = [
            ChatMessage::system("rule one"),
            ChatMessage::user("hi"),
            ChatMessage::system("rule two"),
        ];
        let body = HttpGateway::anthropic_body("claude", &messages, &InvocationParams::default());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["system"], "rule one\n\nrule two");
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["max_tokens"], ANTHROPIC_DEFAULT_MAX_TOKENS);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn status_codes_map_to_typed_errors() {
        let map = |code: u16| {
            HttpGateway::map_status_error("openai", StatusCode::from_u16(code).unwrap(), "body")
        };
        assert_eq!(map(401), ProviderError::InvalidKey);
        assert_eq!(map(403), ProviderError::InvalidKey);
        assert_eq!(map(429), ProviderError::RateLimit);
        assert_eq!(map(408), ProviderError::Timeout);
        assert_eq!(map(504), ProviderError::Timeout);
        assert!(matches!(map(404), ProviderError::ModelUnavailable(_)));
        assert!(matches!(map(500), ProviderError::Other(ref s) if s.contains("500")));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = HttpGateway::map_status_error("xai", StatusCode::BAD_REQUEST, &body);
        let ProviderError::Other(msg) = err else {
            panic!("expected Other");
        };
        assert!(msg.len() < 300);
        assert!(msg.ends_with("..."));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let gw = gateway_with(&[]);
        let err = gw
            .invoke("openai:gpt-4o", &[ChatMessage::user("hi")], &InvocationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::InvalidKey);
    }

    #[tokio::test]
    async fn unknown_provider_is_unavailable() {
        let gw = gateway_with(&[("OPENAI_API_KEY", "sk-1")]);
        let err = gw
            .invoke("mystery:model", &[ChatMessage::user("hi")], &InvocationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::ModelUnavailable("mystery:model".into()));
    }
}
