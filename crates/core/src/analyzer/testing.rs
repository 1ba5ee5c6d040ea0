//! In-memory doubles for the pipeline seams.

use crate::analyzer::{Persister, TickerCatalog};
use crate::domain::analysis::{AnalysisBatch, Ticker, TickerAnalysis};
use crate::llm::error::ModelError;
use crate::llm::{ModelAdapter, ModelExchange, Provider};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A well-formed answer for `symbols`, wrapped in the kind of prose models add.
pub fn payload_for(symbols: &[String]) -> String {
    let assessment = |rec: &str| json!({"recommendation": rec, "confidence": 60, "reason": "fixture"});
    let strategies: Vec<_> = ["value", "momentum", "dividend", "growth", "breakout"]
        .iter()
        .map(|name| json!({"name": name, "stance": "NEUTRAL", "note": "fixture"}))
        .collect();
    let tickers: Vec<_> = symbols
        .iter()
        .map(|s| {
            json!({
                "ticker": s,
                "short_term": assessment("HOLD"),
                "long_term": assessment("ACCUMULATE"),
                "strategies": strategies.clone(),
                "overall": assessment("HOLD"),
            })
        })
        .collect();
    let body = json!({
        "as_of": "2026-01-27T09:00:00+07:00",
        "tickers": tickers,
        "sources": ["https://example.com/report"],
    });
    format!("Here is the analysis.\n```json\n{body}\n```\nHope this helps.")
}

pub enum Reply {
    Output(String),
    Error(fn() -> ModelError),
    Delayed(Duration, Box<Reply>),
}

/// Answers with [`payload_for`] unless a script entry matches a symbol in the batch.
pub struct ScriptedAdapter {
    delay: Duration,
    scripts: Vec<(String, Reply)>,
    rate_limited_first: usize,
    pub calls: Arc<AtomicUsize>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scripts: Vec::new(),
            rate_limited_first: 0,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(mut self, symbol: &str, reply: Reply) -> Self {
        self.scripts.push((symbol.to_string(), reply));
        self
    }

    pub fn rate_limit_first(mut self, n: usize) -> Self {
        self.rate_limited_first = n;
        self
    }

    async fn respond(&self, symbols: &[String], call: usize) -> Result<ModelExchange, ModelError> {
        let mut delay = self.delay;
        let mut reply = self
            .scripts
            .iter()
            .find(|(sym, _)| symbols.contains(sym))
            .map(|(_, r)| r);
        while let Some(Reply::Delayed(d, inner)) = reply {
            delay = *d;
            reply = Some(inner.as_ref());
        }

        tokio::time::sleep(delay).await;

        if call <= self.rate_limited_first {
            return Err(ModelError::RateLimited {
                provider: Provider::Static,
                detail: format!("call {call}"),
            });
        }

        let output = match reply {
            Some(Reply::Error(make)) => return Err(make()),
            Some(Reply::Output(text)) => text.clone(),
            Some(Reply::Delayed(..)) | None => payload_for(symbols),
        };

        Ok(ModelExchange {
            raw_request: json!({"symbols": symbols}).to_string(),
            raw_response: json!({"output": output}).to_string(),
            output,
        })
    }
}

#[async_trait::async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        Provider::Static
    }

    async fn analyze(&self, symbols: &[String]) -> Result<ModelExchange, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let res = self.respond(symbols, call).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tickers: Mutex<BTreeMap<String, Option<String>>>,
    analyses: Mutex<BTreeMap<(String, NaiveDate), TickerAnalysis>>,
    logs: Mutex<Vec<(String, String)>>,
    pub fail_commits: AtomicBool,
    pub fail_catalog: AtomicBool,
}

impl MemoryStore {
    pub fn with_tickers(symbols: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut tickers = store.tickers.lock().unwrap();
            for s in symbols {
                tickers.insert(s.to_string(), None);
            }
        }
        store
    }

    pub fn has_analysis(&self, ticker: &str) -> bool {
        self.analyses
            .lock()
            .unwrap()
            .keys()
            .any(|(t, _)| t == ticker)
    }

    pub fn analysis_count(&self) -> usize {
        self.analyses.lock().unwrap().len()
    }

    pub fn request_logs(&self) -> Vec<(String, String)> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Persister for MemoryStore {
    async fn record_exchange(&self, request: &str, response: &str) -> anyhow::Result<()> {
        self.logs
            .lock()
            .unwrap()
            .push((request.to_string(), response.to_string()));
        Ok(())
    }

    async fn commit(&self, batch: &AnalysisBatch) -> anyhow::Result<u64> {
        anyhow::ensure!(
            !self.fail_commits.load(Ordering::SeqCst),
            "connection reset by peer"
        );
        let mut tickers = self.tickers.lock().unwrap();
        let mut analyses = self.analyses.lock().unwrap();
        for item in &batch.items {
            tickers.entry(item.ticker.clone()).or_insert(item.name.clone());
            analyses.insert((item.ticker.clone(), batch.as_of_date), item.clone());
        }
        Ok(batch.items.len() as u64)
    }
}

#[async_trait::async_trait]
impl TickerCatalog for MemoryStore {
    async fn list_tickers(&self) -> anyhow::Result<Vec<Ticker>> {
        anyhow::ensure!(
            !self.fail_catalog.load(Ordering::SeqCst),
            "database unavailable"
        );
        Ok(self
            .tickers
            .lock()
            .unwrap()
            .iter()
            .map(|(symbol, name)| Ticker {
                symbol: symbol.clone(),
                name: name.clone(),
            })
            .collect())
    }
}
