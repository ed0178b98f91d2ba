use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, Url};
use std::time::Duration;
use tracing::debug;

use super::{ChangeSet, ChangesResponse, RemoteApi};
use crate::error::RemoteError;
use crate::sync::{EntityKind, Record};

pub struct HttpClient {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Protocol(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RemoteError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token: None,
            client,
        })
    }

    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::Protocol(format!("Base URL '{}' cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn kind_segment(kind: EntityKind) -> &'static str {
        kind.endpoint().trim_start_matches('/')
    }

    /// Send a request and return the response body of a 2xx reply
    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Record>,
    ) -> Result<String, RemoteError> {
        debug!("HTTP {} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Connection(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                body: error_text,
            });
        }

        response
            .text()
            .await
            .map_err(|e| RemoteError::Protocol(format!("Failed to read response: {}", e)))
    }

    /// The canonical record echoed back by create/update, if the body holds one
    fn canonical_record(text: &str) -> Option<Record> {
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Response body is not a record, keeping local copy: {}", e);
                None
            }
        }
    }

    /// `GET /health`
    pub async fn ping(&self) -> Result<bool, RemoteError> {
        let url = self.url(&["health"])?;
        Ok(self.request(Method::GET, url, None).await.is_ok())
    }
}

#[async_trait]
impl RemoteApi for HttpClient {
    async fn create(
        &self,
        kind: EntityKind,
        record: &Record,
    ) -> Result<Option<Record>, RemoteError> {
        let url = self.url(&[Self::kind_segment(kind)])?;
        let text = self.request(Method::POST, url, Some(record)).await?;
        Ok(Self::canonical_record(&text))
    }

    async fn update(
        &self,
        kind: EntityKind,
        record: &Record,
    ) -> Result<Option<Record>, RemoteError> {
        let url = self.url(&[Self::kind_segment(kind), record.id.as_str()])?;
        let text = self.request(Method::PUT, url, Some(record)).await?;
        Ok(Self::canonical_record(&text))
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        let url = self.url(&[Self::kind_segment(kind), id])?;
        self.request(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn fetch_changes(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ChangeSet, RemoteError> {
        let mut url = self.url(&["sync", "changes"])?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Millis, true));
        }

        let text = self.request(Method::GET, url, None).await?;
        let response: ChangesResponse = serde_json::from_str(&text).map_err(|e| {
            RemoteError::Protocol(format!("Failed to parse changes: {} - Text: {}", e, text))
        })?;
        Ok(response.changes)
    }
}
