use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::remote::{row_id, Filter, Identity, Order, RemoteError, RemoteStore};

/// PostgREST-style row store (`/rest/v1/<table>`)
pub struct RestRemoteStore {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl RestRemoteStore {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build remote store HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, req: RequestBuilder, identity: &Identity) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
    }

    async fn send(req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);

        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn filter_query(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("eq.{}", f.value)))
        .collect()
}

#[async_trait::async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert(
        &self,
        identity: &Identity,
        table: &str,
        row: Value,
    ) -> Result<String, RemoteError> {
        let req = self
            .client
            .post(self.table_url(table))
            .query(&[("select", "id")])
            .header("Prefer", "return=representation")
            .json(&row);

        let resp = Self::send(self.authorized(req, identity)).await?;
        let rows: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        let id = rows
            .first()
            .and_then(row_id)
            .ok_or_else(|| RemoteError::Malformed("insert returned no id".to_string()))?;

        debug!("Inserted {} row {}", table, id);
        Ok(id)
    }

    async fn select(
        &self,
        identity: &Identity,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter_query(filters));
        if let Some(order) = order {
            let dir = if order.ascending { "asc" } else { "desc" };
            query.push(("order".to_string(), format!("{}.{}", order.column, dir)));
        }

        let req = self.client.get(self.table_url(table)).query(&query);
        let resp = Self::send(self.authorized(req, identity)).await?;

        resp.json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn delete(
        &self,
        identity: &Identity,
        table: &str,
        filters: &[Filter],
    ) -> Result<(), RemoteError> {
        let req = self
            .client
            .delete(self.table_url(table))
            .query(&filter_query(filters));

        Self::send(self.authorized(req, identity)).await?;
        Ok(())
    }
}
