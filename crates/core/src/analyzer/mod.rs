pub mod batch;
pub mod dispatch;
pub mod error;
pub mod options;

#[cfg(test)]
pub(crate) mod testing;

use crate::analyzer::dispatch::{Dispatcher, RunReport};
use crate::analyzer::error::PipelineError;
use crate::analyzer::options::AnalyzerOptions;
use crate::domain::analysis::{AnalysisBatch, Ticker};
use crate::llm::ModelAdapter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read-only source of the symbols to analyze.
#[async_trait::async_trait]
pub trait TickerCatalog: Send + Sync {
    /// Every known ticker, ordered by symbol.
    async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>>;
}

/// Sole writer of tickers, analyses and request logs.
#[async_trait::async_trait]
pub trait Persister: Send + Sync {
    /// Appends one audit row for a raw model exchange.
    async fn record_exchange(&self, request: &str, response: &str) -> anyhow::Result<()>;

    /// Upserts every ticker/analysis in `batch`; returns the analysis rows written.
    async fn commit(&self, batch: &AnalysisBatch) -> anyhow::Result<u64>;
}

pub struct Analyzer {
    catalog: Arc<dyn TickerCatalog>,
    dispatcher: Dispatcher,
    batch_size: usize,
}

impl Analyzer {
    pub fn new(
        catalog: Arc<dyn TickerCatalog>,
        adapter: Arc<dyn ModelAdapter>,
        persister: Arc<dyn Persister>,
        opts: &AnalyzerOptions,
    ) -> Self {
        Self {
            catalog,
            dispatcher: Dispatcher::new(adapter, persister, opts.concurrency, opts.timeout, opts.strict),
            batch_size: opts.batch_size,
        }
    }

    /// Analyzes the whole catalog. A catalog failure is reported the same way
    /// as a batch failure, with zero batches dispatched.
    pub async fn analyze_all_and_store(&self, shutdown: &CancellationToken) -> RunReport {
        let tickers = match self.catalog.list_tickers().await {
            Ok(tickers) => tickers,
            Err(err) => {
                tracing::error!(error = %err, "failed to list tickers");
                return RunReport {
                    first_error: Some(PipelineError::Catalog(err)),
                    ..RunReport::default()
                };
            }
        };

        let symbols: Vec<String> = tickers.into_iter().map(|t| t.symbol).collect();
        self.analyze_symbols(&symbols, shutdown).await
    }

    pub async fn analyze_symbols(&self, symbols: &[String], shutdown: &CancellationToken) -> RunReport {
        let batches = batch::make_batches(symbols, self.batch_size);
        tracing::info!(
            symbols = symbols.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "starting analysis run"
        );
        self.dispatcher.run(batches, shutdown).await
    }
}
