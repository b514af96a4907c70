//! Hand-off from the wildcard endpoint to the host's ticket pipeline.
//!
//! Once a request is authorized, the ticket body is passed on unchanged
//! together with the resolved key id. The default implementation forwards
//! to the host over HTTP.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketFormat {
    Xml,
    Json,
    Email,
}

impl TicketFormat {
    /// Parse the `tickets.{format}` path segment.
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        match endpoint.strip_prefix("tickets.")? {
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for TicketFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone)]
pub struct TicketSubmission {
    pub format: TicketFormat,
    pub key_id: u64,
    pub caller: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait TicketPipeline: Send + Sync {
    async fn create_ticket(&self, submission: TicketSubmission) -> Result<PipelineResponse>;
}

/// Forwards authorized submissions to `{base_url}/tickets.{format}`.
#[derive(Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpForwarder {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build upstream reqwest client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl TicketPipeline for HttpForwarder {
    async fn create_ticket(&self, submission: TicketSubmission) -> Result<PipelineResponse> {
        let url = format!("{}/tickets.{}", self.base_url, submission.format);

        let mut req = self
            .client
            .post(&url)
            .header("X-Wildkey-Key-Id", submission.key_id.to_string())
            .header("X-Forwarded-For", submission.caller.as_str())
            .body(submission.body);
        if let Some(ct) = &submission.content_type {
            req = req.header("Content-Type", ct.as_str());
        }

        let resp = req.send().await.with_context(|| format!("POST {url}"))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await.context("read upstream response body")?;

        debug!(url = %url, status, "ticket forwarded upstream");
        Ok(PipelineResponse {
            status,
            content_type,
            body,
        })
    }
}
