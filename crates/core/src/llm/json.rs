use crate::analyzer::error::PipelineError;
use crate::domain::analysis::AnalysisBatch;
use crate::domain::contract::LlmAnalysisPayload;
use chrono::{DateTime, Utc};

/// Best-effort extraction: first '{' to last '}' inclusive.
pub fn find_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Like [`find_json_object`], but hands the input back untouched when there is
/// no object so the decoder reports the failure.
pub fn extract_json(text: &str) -> &str {
    find_json_object(text).unwrap_or(text)
}

pub fn parse_batch(
    json_text: &str,
    now: DateTime<Utc>,
    strict: bool,
) -> Result<AnalysisBatch, PipelineError> {
    let payload = serde_json::from_str::<LlmAnalysisPayload>(json_text).map_err(|e| {
        PipelineError::MalformedPayload(format!("model output is not a valid analysis payload: {e}"))
    })?;
    payload
        .validate_and_into_batch(now, strict)
        .map_err(|e| PipelineError::MalformedPayload(format!("{e:#}")))
}
