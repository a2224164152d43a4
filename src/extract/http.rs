use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::validate::extract_json_object;
use super::RecordExtractor;
use crate::error::Error;

const EXPENSE_PATH: &str = "/api/expense/parse";
const PLAN_PATH: &str = "/api/plan";

/// Extractor backed by the app's LLM endpoints
pub struct HttpExtractor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build extractor HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, Error> {
        let url = format!("{}{}", self.base_url, path);
        info!("Calling extractor {}", url);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExtractionFailed(format!("request to {} failed: {}", url, e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::ExtractionFailed(format!("reading response failed: {}", e)))?;

        if !status.is_success() {
            warn!("Extractor returned {}", status);
            let detail: String = text.chars().take(200).collect();
            return Err(Error::ExtractionFailed(format!(
                "extractor returned {}: {}",
                status, detail
            )));
        }

        parse_record_body(&text)
    }
}

/// Turn a response body into a JSON object, or fail
pub fn parse_record_body(body: &str) -> Result<Value, Error> {
    if body.trim().is_empty() {
        return Err(Error::ExtractionFailed("empty response".to_string()));
    }

    let value: Value = serde_json::from_str(extract_json_object(body))
        .map_err(|e| Error::ExtractionFailed(format!("malformed JSON: {}", e)))?;

    if !value.is_object() {
        return Err(Error::ExtractionFailed("response missing content".to_string()));
    }

    Ok(value)
}

#[async_trait::async_trait]
impl RecordExtractor for HttpExtractor {
    async fn extract_expense(&self, text: &str) -> Result<Value, Error> {
        self.post(EXPENSE_PATH, json!({ "text": text })).await
    }

    async fn extract_plan(&self, input: &str) -> Result<Value, Error> {
        self.post(PLAN_PATH, json!({ "input": input })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_body_accepts_wrapped_json() {
        let value = parse_record_body("```json\n{\"amount\":80}\n```").unwrap();
        assert_eq!(value["amount"], 80);
    }

    #[test]
    fn test_parse_record_body_rejects_garbage() {
        assert!(matches!(
            parse_record_body("not json"),
            Err(Error::ExtractionFailed(_))
        ));
        assert!(matches!(parse_record_body("  "), Err(Error::ExtractionFailed(_))));
        assert!(matches!(parse_record_body("[1,2]"), Err(Error::ExtractionFailed(_))));
    }
}
