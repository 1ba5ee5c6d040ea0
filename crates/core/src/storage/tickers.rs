use crate::domain::analysis::Ticker;
use anyhow::Context;

pub async fn list_tickers(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Ticker>> {
    let rows = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT symbol, name FROM tickers ORDER BY symbol ASC",
    )
    .fetch_all(pool)
    .await
    .context("select tickers failed")?;

    Ok(rows
        .into_iter()
        .map(|(symbol, name)| Ticker { symbol, name })
        .collect())
}

/// Inserts the ticker if absent; an existing row is left untouched.
pub async fn upsert_ticker(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    symbol: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO tickers (symbol, name) VALUES ($1, $2) \
         ON CONFLICT (symbol) DO NOTHING",
    )
    .bind(symbol)
    .bind(name)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert tickers failed (symbol={symbol})"))?;

    Ok(())
}
