//! Schema registry client.
//!
//! Speaks the Confluent-compatible REST API: schemas are fetched by numeric id
//! and registered per subject. Several registry base URLs may be configured;
//! they are tried in order and the next one is only used when the previous
//! was unreachable or slow.

use crate::error::{Error, Result};
use async_trait::async_trait;
use kafka_types::SchemaId;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// Remote store of schema definitions addressable by id.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fetch the schema text registered under `id`.
    async fn fetch_schema_by_id(&self, id: SchemaId) -> Result<String>;

    /// Register `schema` under `subject`, returning its id.
    ///
    /// Registering an already known schema returns the existing id.
    async fn register_schema(&self, subject: &str, schema: &str) -> Result<SchemaId>;
}

#[async_trait]
impl<R: SchemaRegistry + ?Sized> SchemaRegistry for Arc<R> {
    async fn fetch_schema_by_id(&self, id: SchemaId) -> Result<String> {
        (**self).fetch_schema_by_id(id).await
    }

    async fn register_schema(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        (**self).register_schema(subject, schema).await
    }
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Debug, Serialize)]
struct RegisterSchemaRequest<'a> {
    schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: SchemaId,
}

/// HTTP client for the schema registry REST API
pub struct HttpSchemaRegistry {
    base_urls: Vec<String>,
    http_client: reqwest::Client,
}

impl HttpSchemaRegistry {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a client for the given registry base URLs (e.g. "http://localhost:8081")
    pub fn new(base_urls: Vec<String>) -> Result<Self> {
        Self::with_timeout(base_urls, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let base_urls: Vec<String> = base_urls
            .into_iter()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();

        if base_urls.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one schema registry URL is required".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_urls,
            http_client,
        })
    }

    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    async fn with_failover<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for base_url in &self.base_urls {
            match op(base_url.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::warn!(registry = %base_url, error = %e, "Schema registry request failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Internal("no schema registry URL configured".to_string())))
    }

    async fn fetch_from(&self, base_url: String, id: SchemaId) -> Result<String> {
        let url = format!("{base_url}/schemas/ids/{id}");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| send_error(&base_url, e))?;

        let response = check_status(&base_url, response, "Schema lookup").await?;

        let body: SchemaResponse = response.json().await.map_err(|e| {
            Error::BadData(format!("Failed to parse schema response from {base_url}: {e}"))
        })?;

        tracing::debug!(schema_id = id, registry = %base_url, "Schema retrieved");

        Ok(body.schema)
    }

    async fn register_at(
        &self,
        base_url: String,
        subject: &str,
        schema: &str,
    ) -> Result<SchemaId> {
        let url = format!("{base_url}/subjects/{subject}/versions");

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&RegisterSchemaRequest { schema })
            .send()
            .await
            .map_err(|e| send_error(&base_url, e))?;

        let response = check_status(&base_url, response, "Schema registration").await?;

        let body: RegisterSchemaResponse = response.json().await.map_err(|e| {
            Error::BadData(format!(
                "Failed to parse registration response from {base_url}: {e}"
            ))
        })?;

        tracing::debug!(schema_id = body.id, subject, registry = %base_url, "Schema registered");

        Ok(body.id)
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn fetch_schema_by_id(&self, id: SchemaId) -> Result<String> {
        self.with_failover(|base_url| self.fetch_from(base_url, id))
            .await
    }

    async fn register_schema(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        self.with_failover(|base_url| self.register_at(base_url, subject, schema))
            .await
    }
}

fn send_error(base_url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("schema registry {base_url}: {e}"))
    } else {
        Error::Unavailable(format!("schema registry {base_url}: {e}"))
    }
}

async fn check_status(
    base_url: &str,
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{what} at {base_url} failed with status {status}: {body}");

    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Error::BadData(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout(detail),
        s if s.is_server_error() => Error::Unavailable(detail),
        _ => Error::Internal(detail),
    })
}
