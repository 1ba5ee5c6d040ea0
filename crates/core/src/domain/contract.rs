use crate::domain::analysis::{
    AnalysisBatch, Assessment, StrategyNote, TickerAnalysis, EXPECTED_MIN_STRATEGIES,
    RECOMMENDATIONS, STANCES,
};
use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Payload shape the model is asked to emit. Only `tickers[].ticker` is
/// mandatory; everything else degrades to an empty value.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAnalysisPayload {
    #[serde(default)]
    pub as_of: Option<String>,
    pub tickers: Vec<LlmTickerAnalysis>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTickerAnalysis {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_term: Option<LlmAssessment>,
    #[serde(default)]
    pub long_term: Option<LlmAssessment>,
    #[serde(default)]
    pub strategies: Option<Vec<LlmStrategy>>,
    #[serde(default, alias = "overall_recommendation")]
    pub overall: Option<LlmAssessment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmAssessment {
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "justification")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmStrategy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stance: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

// Models emit confidence as 80, 80.5, "80" or "80%".
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

/// Day key for a payload: the calendar date written in `as_of`, or today (UTC)
/// when it is missing or unparseable.
pub fn resolve_as_of_date(as_of: Option<&str>, now: DateTime<Utc>) -> NaiveDate {
    let Some(raw) = as_of.map(str::trim).filter(|s| !s.is_empty()) else {
        return now.date_naive();
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.date_naive();
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return ts.date();
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d;
    }

    tracing::warn!(as_of = raw, "unparseable as_of in model output; using processing time");
    now.date_naive()
}

impl LlmAnalysisPayload {
    pub fn validate_and_into_batch(
        self,
        now: DateTime<Utc>,
        strict: bool,
    ) -> anyhow::Result<AnalysisBatch> {
        let as_of_date = resolve_as_of_date(self.as_of.as_deref(), now);

        let mut items: Vec<TickerAnalysis> = Vec::with_capacity(self.tickers.len());
        for item in self.tickers {
            let item = item.validate_and_into_item(strict)?;
            // One entry per ticker per batch; a repeated ticker replaces the earlier one.
            match items.iter_mut().find(|i| i.ticker == item.ticker) {
                Some(existing) => {
                    tracing::warn!(ticker = %item.ticker, "duplicate ticker in model output; keeping last");
                    *existing = item;
                }
                None => items.push(item),
            }
        }

        let sources = self
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(AnalysisBatch {
            as_of_date,
            items,
            sources,
        })
    }
}

impl LlmTickerAnalysis {
    fn validate_and_into_item(self, strict: bool) -> anyhow::Result<TickerAnalysis> {
        let ticker = self.ticker.trim().to_uppercase();
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        let short_term = assessment(self.short_term, strict, &ticker, "short_term")?;
        let long_term = assessment(self.long_term, strict, &ticker, "long_term")?;
        let overall = assessment(self.overall, strict, &ticker, "overall")?;

        let mut strategies = Vec::new();
        for s in self.strategies.unwrap_or_default() {
            let stance = normalize(s.stance);
            if strict && !STANCES.contains(&stance.as_str()) {
                bail!("{ticker}: unknown strategy stance {stance:?}");
            }
            strategies.push(StrategyNote {
                name: s.name.map(|n| n.trim().to_string()).unwrap_or_default(),
                stance,
                note: s.note.map(|n| n.trim().to_string()).unwrap_or_default(),
            });
        }
        if strategies.len() < EXPECTED_MIN_STRATEGIES {
            tracing::warn!(
                %ticker,
                got = strategies.len(),
                expected = EXPECTED_MIN_STRATEGIES,
                "fewer strategies than requested"
            );
        }

        let name = self
            .name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(TickerAnalysis {
            ticker,
            name,
            short_term,
            long_term,
            strategies,
            overall,
        })
    }
}

fn normalize(value: Option<String>) -> String {
    value.map(|s| s.trim().to_uppercase()).unwrap_or_default()
}

fn assessment(
    raw: Option<LlmAssessment>,
    strict: bool,
    ticker: &str,
    field: &str,
) -> anyhow::Result<Assessment> {
    let raw = raw.unwrap_or_default();
    let recommendation = normalize(raw.recommendation);

    let confidence = match raw.confidence {
        Some(c) if strict => {
            ensure!(
                (0.0..=100.0).contains(&c),
                "{ticker}.{field}: confidence must be between 0 and 100 (got {c})"
            );
            c.round() as i32
        }
        Some(c) => c.clamp(0.0, 100.0).round() as i32,
        None if strict => bail!("{ticker}.{field}: confidence is missing"),
        None => 0,
    };

    if strict && !RECOMMENDATIONS.contains(&recommendation.as_str()) {
        bail!("{ticker}.{field}: unknown recommendation {recommendation:?}");
    }

    Ok(Assessment {
        recommendation,
        confidence,
        reason: raw.reason.map(|s| s.trim().to_string()).unwrap_or_default(),
    })
}
