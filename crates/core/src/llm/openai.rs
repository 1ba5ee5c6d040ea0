use crate::config::Settings;
use crate::llm::error::ModelError;
use crate::llm::{ModelAdapter, ModelExchange, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_batch: usize,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_batch = std::env::var("OPENAI_MAX_BATCH")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(DEFAULT_MAX_BATCH);

        Self::new(api_key, base_url, model, Duration::from_secs(timeout_secs), max_batch)
    }

    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        max_batch: usize,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_batch: max_batch.max(1),
        })
    }

    fn system_prompt() -> &'static str {
        "You are a financial analyst. Respond with a single JSON object only."
    }

    fn user_prompt(symbols: &[String]) -> String {
        [
            format!("Analyze the following tickers: {}.", symbols.join(", ")),
            "For each ticker provide:".to_string(),
            "- short_term: {\"recommendation\", \"confidence\", \"reason\"}".to_string(),
            "- long_term: {\"recommendation\", \"confidence\", \"reason\"}".to_string(),
            "- strategies: at least 5 entries [{\"name\", \"stance\", \"note\"}]".to_string(),
            "- overall: {\"recommendation\", \"confidence\", \"reason\"}".to_string(),
            "recommendation is one of ACCUMULATE, HOLD, AVOID; stance is one of FAVORABLE, NEUTRAL, UNFAVORABLE; confidence is 0-100.".to_string(),
            "Output schema: {\"as_of\": \"RFC3339 timestamp\", \"tickers\": [{\"ticker\", \"short_term\", \"long_term\", \"strategies\", \"overall\"}], \"sources\": [\"url\"]}".to_string(),
        ]
        .join("\n")
    }

    fn build_request(&self, symbols: &[String]) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: Self::system_prompt().to_string(),
                },
                Message {
                    role: "user",
                    content: Self::user_prompt(symbols),
                },
            ],
        }
    }

    async fn create_completion(
        &self,
        req: &ChatCompletionRequest,
        raw_request: &str,
    ) -> Result<String, ModelError> {
        let provider = Provider::OpenAI;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
            ModelError::Auth {
                provider,
                detail: format!("invalid api key header: {e}"),
            }
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(raw_request.to_string())
            .send()
            .await
            .map_err(|e| ModelError::Transport {
                provider,
                stage: "send",
                detail: e.to_string(),
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| ModelError::Transport {
            provider,
            stage: "read_body",
            detail: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(ModelError::from_status(provider, status, &text));
        }

        tracing::debug!(model = %req.model, bytes = text.len(), "openai completion received");
        Ok(text)
    }

    /// Assistant text of the first choice. An envelope we cannot read yields an
    /// empty string so the exchange is still logged and the parse stage fails.
    fn response_text(raw_response: &str) -> String {
        match serde_json::from_str::<ChatCompletionResponse>(raw_response) {
            Ok(res) => {
                let Some(choice) = res.choices.into_iter().next() else {
                    tracing::warn!("openai response has no choices");
                    return String::new();
                };
                if matches!(choice.finish_reason.as_deref(), Some("length")) {
                    tracing::warn!("openai output truncated (finish_reason=length)");
                }
                choice.message.content.unwrap_or_default()
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode openai response envelope");
                String::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl ModelAdapter for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn analyze(&self, symbols: &[String]) -> Result<ModelExchange, ModelError> {
        let symbols = if symbols.len() > self.max_batch {
            tracing::warn!(
                requested = symbols.len(),
                max_batch = self.max_batch,
                dropped = ?&symbols[self.max_batch..],
                "batch exceeds OPENAI_MAX_BATCH; extra symbols dropped"
            );
            &symbols[..self.max_batch]
        } else {
            symbols
        };

        let req = self.build_request(symbols);
        let raw_request = serde_json::to_string(&req).map_err(|e| ModelError::Transport {
            provider: Provider::OpenAI,
            stage: "encode",
            detail: e.to_string(),
        })?;

        let raw_response = self.create_completion(&req, &raw_request).await?;
        let output = Self::response_text(&raw_response);

        Ok(ModelExchange {
            raw_request,
            raw_response,
            output,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
