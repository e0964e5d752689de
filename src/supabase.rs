//! Minimal client for the hosted data platform: PostgREST tables and object storage.

use std::time::Duration;

use axum::body::Bytes;
use reqwest::{RequestBuilder, Response, Url};
use serde_json::Value;

use crate::{
    config::SupabaseConfig,
    error::{AppError, Result},
};

/// What PostgREST should send back after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returning {
    Representation,
    Minimal,
}

impl Returning {
    fn prefer_header(self) -> &'static str {
        match self {
            Self::Representation => "return=representation",
            Self::Minimal => "return=minimal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataStore {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl DataStore {
    pub fn new(client: reqwest::Client, config: SupabaseConfig) -> Self {
        Self { client, config }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.config.url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    /// Inserts `rows` into `table` in one call.
    ///
    /// With [`Returning::Representation`] the created rows are returned;
    /// with [`Returning::Minimal`] the result is `Value::Null`.
    pub async fn insert(
        &self,
        table: &str,
        rows: &[Value],
        returning: Returning,
        timeout: Duration,
    ) -> Result<Value> {
        let context = format!("Supabase insert {table}");
        let response = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", returning.prefer_header())
            .timeout(timeout)
            .json(rows)
            .send()
            .await
            .map_err(|e| AppError::transport(&context, e))?;
        let body = ensure_success(&context, response).await?;
        match returning {
            Returning::Minimal => Ok(Value::Null),
            Returning::Representation if body.trim().is_empty() => Ok(Value::Null),
            Returning::Representation => serde_json::from_str(&body)
                .map_err(|e| AppError::upstream(&context, None, format!("invalid JSON: {e}"))),
        }
    }

    /// Runs a PostgREST select with raw query parameters
    /// (`("session_id", "eq.abc")`, `("order", "created_at.desc")`, ...).
    pub async fn select(
        &self,
        table: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let context = format!("Supabase select {table}");
        let response = self
            .authorized(self.client.get(self.table_url(table)))
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AppError::transport(&context, e))?;
        let body = ensure_success(&context, response).await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(_) => Ok(Vec::new()),
            Err(e) => Err(AppError::upstream(&context, None, format!("invalid JSON: {e}"))),
        }
    }

    /// Object URL with every segment of `path` percent-encoded, so the stored
    /// key is exactly `path`.
    fn object_url(&self, path: &str) -> Result<Url> {
        let invalid = |detail: String| AppError::upstream("Storage upload", None, detail);
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| invalid(format!("invalid SUPABASE_URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| invalid("SUPABASE_URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "object", self.config.bucket.as_str()])
            .extend(path.split('/'));
        Ok(url)
    }

    /// Uploads raw bytes to `{bucket}/{path}`, overwriting any existing object.
    pub async fn upload_object(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        timeout: Duration,
    ) -> Result<()> {
        let url = self.object_url(path)?;
        let response = self
            .authorized(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .timeout(timeout)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::transport("Storage upload", e))?;
        ensure_success("Storage upload", response).await?;
        Ok(())
    }
}

/// Returns the response body on 2xx, otherwise an upstream error carrying it.
pub(crate) async fn ensure_success(context: &str, response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(AppError::upstream(context, Some(status.as_u16()), body))
    }
}

/// Extracts the generated id from an insert representation: either an array
/// whose first row carries `id`, or a bare object.
pub fn extract_id(body: &Value) -> Option<String> {
    let row = match body {
        Value::Array(rows) => rows.first()?,
        other => other,
    };
    match row.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
