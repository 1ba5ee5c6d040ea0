use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use futuna_core::analyzer::options::AnalyzerOptions;
use futuna_core::analyzer::Analyzer;
use futuna_core::config::Settings;
use futuna_core::domain::analysis::{Analysis, Ticker};
use futuna_core::llm::openai::OpenAiClient;
use futuna_core::llm::retry::RateLimitRetry;
use futuna_core::storage::{PgStore, ResultStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(settings.database_max_connections)
            .connect(db_url)
            .await
        {
            Ok(pool) => match futuna_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let store = pool.clone().map(|p| Arc::new(PgStore::new(p)));
    let shutdown = CancellationToken::new();

    let boot_run = match (settings.analyze_on_start, &store) {
        (false, _) => None,
        (true, Some(store)) => spawn_boot_analysis(&settings, Arc::clone(store), shutdown.clone()),
        (true, None) => {
            tracing::warn!("ANALYZE_ON_START set but no database; skipping boot analysis");
            None
        }
    };

    let state = AppState {
        store: store.map(|s| s as Arc<dyn ResultStore>),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    // Batches already at the model still commit; the pool must outlive them.
    shutdown.cancel();
    if let Some(run) = boot_run {
        tracing::info!("waiting for in-flight analysis batches");
        if let Err(e) = run.await {
            tracing::error!(error = %e, "boot analysis task failed");
        }
    }

    if let Some(pool) = pool {
        pool.close().await;
    }
    served?;
    tracing::info!("server stopped cleanly");
    Ok(())
}

/// Boot-time run. Failures are logged and reported, never fatal to the server.
fn spawn_boot_analysis(
    settings: &Settings,
    store: Arc<PgStore>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let prepared = AnalyzerOptions::from_env()
        .and_then(|opts| opts.validate().map(|()| opts))
        .and_then(|opts| Ok((OpenAiClient::from_settings(settings)?, opts)));
    let (client, opts) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "boot analysis not started");
            return None;
        }
    };

    let llm = RateLimitRetry::new(client, opts.rate_limit);
    let analyzer = Analyzer::new(store.clone(), Arc::new(llm), store, &opts);
    Some(spawn_run(analyzer, shutdown))
}

fn spawn_run(analyzer: Analyzer, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("starting initial analysis");
        let report = analyzer.analyze_all_and_store(&shutdown).await;
        let (succeeded, batches) = (report.succeeded, report.batches);
        match report.into_result() {
            Ok(_) => tracing::info!(succeeded, batches, "initial analysis completed"),
            Err(err) => {
                let err = anyhow::Error::new(err).context("initial analysis failed");
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(succeeded, batches, error = %format!("{err:#}"), "initial analysis failed");
            }
        }
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/analysis", get(list_analyses))
        .route("/api/analysis/dates", get(list_analysis_dates))
        .route("/api/tickers", get(list_tickers))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn ResultStore>>,
}

impl AppState {
    fn store(&self) -> Result<&dyn ResultStore, StatusCode> {
        self.store.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisQuery {
    date: Option<String>,
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "store query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn list_analyses(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<Vec<Analysis>>, StatusCode> {
    let store = state.store()?;

    let date = match query.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?,
        None => Utc::now().date_naive(),
    };

    let rows = store.list_analyses(date).await.map_err(internal_error)?;
    Ok(Json(rows))
}

async fn list_tickers(State(state): State<AppState>) -> Result<Json<Vec<Ticker>>, StatusCode> {
    let store = state.store()?;
    let rows = store.list_tickers().await.map_err(internal_error)?;
    Ok(Json(rows))
}

async fn list_analysis_dates(
    State(state): State<AppState>,
) -> Result<Json<Vec<NaiveDate>>, StatusCode> {
    let store = state.store()?;
    let dates = store.list_analysis_dates().await.map_err(internal_error)?;
    Ok(Json(dates))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
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
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use futuna_core::analyzer::{Persister, TickerCatalog};
    use futuna_core::domain::analysis::AnalysisBatch;
    use futuna_core::llm::error::ModelError;
    use futuna_core::llm::{ModelAdapter, ModelExchange, Provider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeStore {
        requested: Mutex<Vec<NaiveDate>>,
    }

    #[async_trait::async_trait]
    impl ResultStore for FakeStore {
        async fn list_analyses(&self, date: NaiveDate) -> anyhow::Result<Vec<Analysis>> {
            self.requested.lock().unwrap().push(date);
            Ok(vec![Analysis {
                id: 1,
                ticker: "FPT".to_string(),
                analyzed_at: date,
                short_term: "HOLD - fixture".to_string(),
                short_confidence: 50,
                long_term: "ACCUMULATE - fixture".to_string(),
                long_confidence: 70,
                strategies: serde_json::json!([]),
                overall: "HOLD - fixture".to_string(),
                overall_confidence: 60,
                sources: serde_json::json!([]),
                created_at: Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap(),
            }])
        }

        async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>> {
            anyhow::bail!("connection refused")
        }

        async fn list_analysis_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
            Ok(vec![NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()])
        }
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let res = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn analysis_by_date() {
        let fake = Arc::new(FakeStore::default());
        let app = router(AppState {
            store: Some(fake.clone()),
        });

        let (status, body) = fetch(app, "/api/analysis?date=2024-01-15").await;
        assert_eq!(status, StatusCode::OK);
        let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows[0]["ticker"], "FPT");
        assert_eq!(rows[0]["date"], "2024-01-15");
        assert_eq!(
            fake.requested.lock().unwrap().as_slice(),
            &[NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()]
        );
    }

    #[tokio::test]
    async fn bad_date_is_rejected() {
        let app = router(AppState {
            store: Some(Arc::new(FakeStore::default())),
        });
        let (status, _) = fetch(app, "/api/analysis?date=15-01-2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn degraded_mode_returns_503() {
        let app = router(AppState { store: None });
        let (status, _) = fetch(app, "/api/tickers").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn store_errors_map_to_500() {
        let app = router(AppState {
            store: Some(Arc::new(FakeStore::default())),
        });
        let (status, _) = fetch(app, "/api/tickers").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn lists_dates() {
        let app = router(AppState {
            store: Some(Arc::new(FakeStore::default())),
        });
        let (status, body) = fetch(app, "/api/analysis/dates").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"["2024-01-15"]"#.to_vec());
    }

    struct SlowModel {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ModelAdapter for SlowModel {
        fn provider(&self) -> Provider {
            Provider::Static
        }

        async fn analyze(&self, symbols: &[String]) -> Result<ModelExchange, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(80)).await;
            let output = serde_json::json!({
                "tickers": symbols.iter().map(|s| serde_json::json!({"ticker": s})).collect::<Vec<_>>()
            })
            .to_string();
            Ok(ModelExchange {
                raw_request: serde_json::json!({"symbols": symbols}).to_string(),
                raw_response: output.clone(),
                output,
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        logs: Mutex<usize>,
        committed: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TickerCatalog for RecordingStore {
        async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>> {
            Ok(["AAA", "BBB"]
                .iter()
                .map(|s| Ticker {
                    symbol: s.to_string(),
                    name: None,
                })
                .collect())
        }
    }

    #[async_trait::async_trait]
    impl Persister for RecordingStore {
        async fn record_exchange(&self, _request: &str, _response: &str) -> anyhow::Result<()> {
            *self.logs.lock().unwrap() += 1;
            Ok(())
        }

        async fn commit(&self, batch: &AnalysisBatch) -> anyhow::Result<u64> {
            let mut committed = self.committed.lock().unwrap();
            committed.extend(batch.items.iter().map(|i| i.ticker.clone()));
            Ok(batch.items.len() as u64)
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_batch() {
        let model = Arc::new(SlowModel {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(RecordingStore::default());
        let opts = AnalyzerOptions {
            batch_size: 1,
            concurrency: 1,
            ..AnalyzerOptions::default()
        };
        let analyzer = Analyzer::new(store.clone(), model.clone(), store.clone(), &opts);

        let shutdown = CancellationToken::new();
        let run = spawn_run(analyzer, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*store.logs.lock().unwrap(), 1);
        assert_eq!(store.committed.lock().unwrap().as_slice(), ["AAA".to_string()]);
    }
}
