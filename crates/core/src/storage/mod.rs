pub mod analyses;
pub mod request_logs;
pub mod tickers;

use crate::analyzer::{Persister, TickerCatalog};
use crate::domain::analysis::{Analysis, AnalysisBatch, Ticker};
use anyhow::Context;
use chrono::NaiveDate;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Read side consumed by the HTTP layer.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Analyses for one day, ordered by ticker.
    async fn list_analyses(&self, date: NaiveDate) -> anyhow::Result<Vec<Analysis>>;

    async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>>;

    /// Distinct analysis dates, newest first.
    async fn list_analysis_dates(&self) -> anyhow::Result<Vec<NaiveDate>>;
}

/// Postgres-backed catalog, persister and result store over one shared pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TickerCatalog for PgStore {
    async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>> {
        tickers::list_tickers(&self.pool).await
    }
}

#[async_trait::async_trait]
impl Persister for PgStore {
    async fn record_exchange(&self, request: &str, response: &str) -> anyhow::Result<()> {
        let id = request_logs::record_request_log(&self.pool, request, response).await?;
        tracing::debug!(%id, "request log recorded");
        Ok(())
    }

    async fn commit(&self, batch: &AnalysisBatch) -> anyhow::Result<u64> {
        analyses::commit_batch(&self.pool, batch).await
    }
}

#[async_trait::async_trait]
impl ResultStore for PgStore {
    async fn list_analyses(&self, date: NaiveDate) -> anyhow::Result<Vec<Analysis>> {
        analyses::list_analyses(&self.pool, date).await
    }

    async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>> {
        tickers::list_tickers(&self.pool).await
    }

    async fn list_analysis_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
        analyses::list_analysis_dates(&self.pool).await
    }
}
