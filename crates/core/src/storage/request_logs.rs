use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

/// Raw wire text as a JSONB value; non-JSON text is wrapped as `{"raw_text": ...}`.
/// NUL characters are dropped since JSONB cannot store `\u0000`.
pub fn as_json_value(raw: &str) -> Value {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw_text": raw }));
    strip_nul(value)
}

fn strip_nul(value: Value) -> Value {
    match value {
        Value::String(s) if s.contains('\0') => Value::String(s.replace('\0', "")),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nul).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.replace('\0', ""), strip_nul(v)))
                .collect(),
        ),
        other => other,
    }
}

pub async fn record_request_log(
    pool: &sqlx::PgPool,
    request: &str,
    response: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO request_logs (id, request, response, created_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .persistent(false)
    .bind(id)
    .bind(as_json_value(request))
    .bind(as_json_value(response))
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("insert request_logs failed")?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_json_and_wraps_plain_text() {
        assert_eq!(as_json_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(
            as_json_value("<html>502</html>"),
            json!({"raw_text": "<html>502</html>"})
        );
        assert_eq!(as_json_value(""), json!({"raw_text": ""}));
    }

    #[test]
    fn drops_nul_characters() {
        assert_eq!(
            as_json_value(r#"{"content":"a\u0000b","choices":[{"k\u0000":"\u0000"}]}"#),
            json!({"content": "ab", "choices": [{"k": ""}]})
        );
        assert_eq!(
            as_json_value("truncated\0 output {"),
            json!({"raw_text": "truncated output {"})
        );
        assert!(!as_json_value("x\0").to_string().contains("\\u0000"));
    }
}
