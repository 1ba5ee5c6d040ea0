use crate::domain::analysis::{Analysis, AnalysisBatch, TickerAnalysis};
use crate::storage::tickers;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// Writes every item of `batch`, one transaction per ticker. Rows committed
/// before a failure stay committed.
pub async fn commit_batch(pool: &sqlx::PgPool, batch: &AnalysisBatch) -> anyhow::Result<u64> {
    let sources = serde_json::to_value(&batch.sources).context("serialize sources failed")?;

    let mut written: u64 = 0;
    for item in &batch.items {
        let mut tx = pool.begin().await.context("begin transaction failed")?;
        tickers::upsert_ticker(&mut tx, &item.ticker, item.name.as_deref()).await?;
        written += upsert_analysis(&mut tx, batch.as_of_date, item, &sources).await?;
        tx.commit().await.context("commit transaction failed")?;
    }

    tracing::debug!(as_of_date = %batch.as_of_date, written, "analyses upserted");
    Ok(written)
}

async fn upsert_analysis(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    analyzed_at: NaiveDate,
    item: &TickerAnalysis,
    sources: &Value,
) -> anyhow::Result<u64> {
    let strategies = serde_json::to_value(&item.strategies).context("serialize strategies failed")?;

    let res = sqlx::query(
        "INSERT INTO analyses (ticker, analyzed_at, short_term, short_confidence, long_term, long_confidence, \
                               strategies, overall, overall_confidence, sources, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) \
         ON CONFLICT (ticker, analyzed_at) DO UPDATE \
           SET short_term = EXCLUDED.short_term, short_confidence = EXCLUDED.short_confidence, \
               long_term = EXCLUDED.long_term, long_confidence = EXCLUDED.long_confidence, \
               strategies = EXCLUDED.strategies, overall = EXCLUDED.overall, \
               overall_confidence = EXCLUDED.overall_confidence, sources = EXCLUDED.sources, \
               created_at = EXCLUDED.created_at",
    )
    .bind(&item.ticker)
    .bind(analyzed_at)
    .bind(item.short_term.summary())
    .bind(item.short_term.confidence)
    .bind(item.long_term.summary())
    .bind(item.long_term.confidence)
    .bind(strategies)
    .bind(item.overall.summary())
    .bind(item.overall.confidence)
    .bind(sources)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert analyses failed (ticker={}, date={analyzed_at})", item.ticker))?;

    Ok(res.rows_affected())
}

type AnalysisRow = (
    i64,
    String,
    NaiveDate,
    String,
    i32,
    String,
    i32,
    Value,
    String,
    i32,
    Value,
    DateTime<Utc>,
);

pub async fn list_analyses(pool: &sqlx::PgPool, date: NaiveDate) -> anyhow::Result<Vec<Analysis>> {
    let rows = sqlx::query_as::<_, AnalysisRow>(
        "SELECT id, ticker, analyzed_at, short_term, short_confidence, long_term, long_confidence, \
                strategies, overall, overall_confidence, sources, created_at \
         FROM analyses \
         WHERE analyzed_at = $1 \
         ORDER BY ticker ASC",
    )
    .bind(date)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select analyses failed (date={date})"))?;

    Ok(rows.into_iter().map(into_analysis).collect())
}

pub async fn list_analysis_dates(pool: &sqlx::PgPool) -> anyhow::Result<Vec<NaiveDate>> {
    let dates = sqlx::query_scalar::<_, NaiveDate>(
        "SELECT DISTINCT analyzed_at FROM analyses ORDER BY analyzed_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("select analysis dates failed")?;

    Ok(dates)
}

fn into_analysis(row: AnalysisRow) -> Analysis {
    let (
        id,
        ticker,
        analyzed_at,
        short_term,
        short_confidence,
        long_term,
        long_confidence,
        strategies,
        overall,
        overall_confidence,
        sources,
        created_at,
    ) = row;

    Analysis {
        id,
        ticker,
        analyzed_at,
        short_term,
        short_confidence,
        long_term,
        long_confidence,
        strategies,
        overall,
        overall_confidence,
        sources,
        created_at,
    }
}
