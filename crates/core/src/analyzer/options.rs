use crate::llm::retry::RetryPolicy;
use anyhow::Context;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Symbols per model call.
    pub batch_size: usize,

    /// Maximum number of batches in flight at once.
    pub concurrency: usize,

    /// Overall deadline for one run. `None` means no deadline.
    pub timeout: Option<Duration>,

    /// Reject recommendation/stance values outside the known sets.
    pub strict: bool,

    pub rate_limit: RetryPolicy,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            strict: false,
            rate_limit: RetryPolicy::default(),
        }
    }
}

impl AnalyzerOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset variables keep their defaults; unparseable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(n) = parse_var::<usize>(&lookup, "ANALYZE_BATCH_SIZE")? {
            out.batch_size = n;
        }

        if let Some(n) = parse_var::<usize>(&lookup, "ANALYZE_CONCURRENCY")? {
            out.concurrency = n;
        }

        if let Some(n) = parse_var::<u64>(&lookup, "ANALYZE_TIMEOUT_SECS")? {
            out.timeout = (n > 0).then(|| Duration::from_secs(n));
        }

        if let Some(s) = lookup("ANALYZE_STRICT") {
            out.strict = crate::config::parse_flag(&s);
        }

        if let Some(n) = parse_var::<u32>(&lookup, "ANALYZE_RATE_LIMIT_ATTEMPTS")? {
            out.rate_limit.attempts = n;
        }

        if let Some(n) = parse_var::<u64>(&lookup, "ANALYZE_RATE_LIMIT_DELAY_MS")? {
            out.rate_limit.delay = Duration::from_millis(n);
        }

        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.batch_size >= 1, "batch size must be >= 1");
        anyhow::ensure!(self.concurrency >= 1, "concurrency must be >= 1");
        anyhow::ensure!(
            self.rate_limit.attempts >= 1,
            "rate limit attempts must be >= 1"
        );
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|s| s.trim().parse::<T>().with_context(|| format!("invalid {key}: {s}")))
        .transpose()
}
