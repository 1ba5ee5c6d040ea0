pub mod error;
pub mod json;
pub mod openai;
pub mod retry;

use crate::llm::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    /// Test doubles and local fakes.
    Static,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Static => "static",
        }
    }
}

/// Raw wire texts of one model call plus the free-text answer pulled out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelExchange {
    pub raw_request: String,
    pub raw_response: String,
    pub output: String,
}

#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Implementations may silently cap `symbols` to their own batch limit.
    async fn analyze(&self, symbols: &[String]) -> Result<ModelExchange, ModelError>;
}
