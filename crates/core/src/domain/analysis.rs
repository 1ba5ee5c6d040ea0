use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const RECOMMENDATIONS: [&str; 3] = ["ACCUMULATE", "HOLD", "AVOID"];
pub const STANCES: [&str; 3] = ["FAVORABLE", "NEUTRAL", "UNFAVORABLE"];

/// The model is asked for at least this many strategies per ticker.
pub const EXPECTED_MIN_STRATEGIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub name: Option<String>,
}

/// Short-term, long-term or overall view on one ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub recommendation: String,
    pub confidence: i32,
    pub reason: String,
}

impl Assessment {
    /// Column text for the `short_term` / `long_term` / `overall` columns.
    pub fn summary(&self) -> String {
        if self.reason.is_empty() {
            self.recommendation.clone()
        } else {
            format!("{} - {}", self.recommendation, self.reason)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyNote {
    pub name: String,
    pub stance: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerAnalysis {
    pub ticker: String,
    pub name: Option<String>,
    pub short_term: Assessment,
    pub long_term: Assessment,
    pub strategies: Vec<StrategyNote>,
    pub overall: Assessment,
}

/// Validated output of one model call, keyed to a single analysis date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisBatch {
    pub as_of_date: NaiveDate,
    pub items: Vec<TickerAnalysis>,
    pub sources: Vec<String>,
}

/// A stored `analyses` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub ticker: String,
    #[serde(rename = "date")]
    pub analyzed_at: NaiveDate,
    pub short_term: String,
    pub short_confidence: i32,
    pub long_term: String,
    pub long_confidence: i32,
    pub strategies: serde_json::Value,
    pub overall: String,
    pub overall_confidence: i32,
    pub sources: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
