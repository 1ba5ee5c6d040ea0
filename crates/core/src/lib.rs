pub mod analyzer;
pub mod domain;
pub mod llm;
pub mod storage;

pub mod config {
    use anyhow::Context;

    const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub database_max_connections: u32,
        pub openai_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        /// Run one analysis pass when the API process boots.
        pub analyze_on_start: bool,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let database_max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
                Ok(s) => s
                    .parse::<u32>()
                    .with_context(|| format!("invalid DATABASE_MAX_CONNECTIONS: {s}"))?,
                Err(_) => DEFAULT_DATABASE_MAX_CONNECTIONS,
            };

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                database_max_connections,
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                analyze_on_start: std::env::var("ANALYZE_ON_START")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(false),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .context("OPENAI_API_KEY is required")
        }
    }

    /// `1` and `true` (any case) are on; everything else is off.
    pub fn parse_flag(value: &str) -> bool {
        let v = value.trim().to_ascii_lowercase();
        v == "1" || v == "true"
    }

}
