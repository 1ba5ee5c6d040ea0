use crate::llm::Provider;
use reqwest::StatusCode;
use thiserror::Error;

const MAX_DETAIL_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("rate limited (provider={}): {detail}", .provider.as_str())]
    RateLimited { provider: Provider, detail: String },

    #[error("model transport failure (provider={}, stage={stage}): {detail}", .provider.as_str())]
    Transport {
        provider: Provider,
        stage: &'static str,
        detail: String,
    },

    #[error("model authentication failed (provider={}): {detail}", .provider.as_str())]
    Auth { provider: Provider, detail: String },
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }

    /// Maps a non-success HTTP status to an error kind.
    pub fn from_status(provider: Provider, status: StatusCode, body: &str) -> Self {
        let detail = format!("status={status} body={}", truncate(body));
        match status {
            StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited { provider, detail },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Auth { provider, detail },
            _ => ModelError::Transport {
                provider,
                stage: "http",
                detail,
            },
        }
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
