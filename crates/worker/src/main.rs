use anyhow::Context;
use clap::Parser;
use futuna_core::analyzer::batch::{make_batches, normalize_symbols};
use futuna_core::analyzer::options::AnalyzerOptions;
use futuna_core::analyzer::Analyzer;
use futuna_core::llm::openai::OpenAiClient;
use futuna_core::llm::retry::RateLimitRetry;
use futuna_core::storage::PgStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "futuna_worker")]
struct Args {
    /// Comma-separated symbols to analyze instead of the stored ticker catalog.
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Symbols per model call (overrides ANALYZE_BATCH_SIZE).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum batches in flight (overrides ANALYZE_CONCURRENCY).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Overall run deadline in seconds; 0 disables it (overrides ANALYZE_TIMEOUT_SECS).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Reject recommendation/stance values outside the known sets.
    #[arg(long)]
    strict: bool,

    /// Print the batches that would be sent and exit.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = futuna_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let opts = resolve_options(&args, AnalyzerOptions::from_env()?);
    opts.validate()?;

    let symbols = args.symbols.as_ref().map(normalize_symbols);

    if args.dry_run {
        let symbols = match symbols {
            Some(symbols) => symbols,
            None => {
                let pool = connect(&settings).await?;
                let tickers = futuna_core::storage::tickers::list_tickers(&pool).await?;
                pool.close().await;
                tickers.into_iter().map(|t| t.symbol).collect()
            }
        };
        for (idx, batch) in make_batches(&symbols, opts.batch_size).iter().enumerate() {
            tracing::info!(batch = idx + 1, symbols = ?batch, dry_run = true, "would analyze");
        }
        return Ok(());
    }

    let pool = connect(&settings).await?;
    futuna_core::storage::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let llm = RateLimitRetry::new(OpenAiClient::from_settings(&settings)?, opts.rate_limit);
    let analyzer = Analyzer::new(store.clone(), Arc::new(llm), store, &opts);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("ctrl-c received; no new batches will be started");
                shutdown.cancel();
            }
        }
    });

    let report = match &symbols {
        Some(symbols) => analyzer.analyze_symbols(symbols, &shutdown).await,
        None => analyzer.analyze_all_and_store(&shutdown).await,
    };

    tracing::info!(
        batches = report.batches,
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        analyses_written = report.analyses_written,
        "analysis run finished"
    );

    pool.close().await;

    if let Err(err) = report.into_result() {
        let err = anyhow::Error::new(err).context("analysis run failed");
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "analysis run failed");
        return Err(err);
    }

    Ok(())
}

async fn connect(settings: &futuna_core::config::Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.database_max_connections)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn resolve_options(args: &Args, mut opts: AnalyzerOptions) -> AnalyzerOptions {
    if let Some(n) = args.batch_size {
        opts.batch_size = n;
    }
    if let Some(n) = args.concurrency {
        opts.concurrency = n;
    }
    if let Some(secs) = args.timeout_secs {
        opts.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.strict {
        opts.strict = true;
    }
    opts
}

fn init_sentry(settings: &futuna_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_env_options() {
        let args = Args::parse_from([
            "futuna_worker",
            "--symbols",
            "fpt,vnm",
            "--batch-size",
            "2",
            "--timeout-secs",
            "0",
            "--strict",
        ]);
        let opts = resolve_options(&args, AnalyzerOptions::default());

        assert_eq!(opts.batch_size, 2);
        assert_eq!(opts.concurrency, 5);
        assert_eq!(opts.timeout, None);
        assert!(opts.strict);
        assert_eq!(
            args.symbols.as_ref().map(normalize_symbols),
            Some(vec!["FPT".to_string(), "VNM".to_string()])
        );
    }

    #[test]
    fn defaults_leave_env_options_alone() {
        let args = Args::parse_from(["futuna_worker"]);
        let env = AnalyzerOptions {
            batch_size: 9,
            ..AnalyzerOptions::default()
        };
        assert_eq!(resolve_options(&args, env.clone()), env);
    }
}
