//! Event handler that forwards each event to an HTTP API.

use anyhow::{bail, Context};
use async_trait::async_trait;
use beacon_listener::telemetry::truncate_message;
use beacon_listener::EventHandler;
use beacon_types::SourceEvent;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_BODY_CHARS: usize = 200;

/// POSTs the event as JSON; any non-2xx response fails the attempt.
#[derive(Debug, Clone)]
pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    /// Targets `api_url` joined with `path`.
    pub fn new(api_url: &str, path: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: join_url(api_url, path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

#[async_trait]
impl<T> EventHandler<T> for WebhookHandler
where
    T: Serialize + Send + Sync,
{
    async fn handle(&self, event: &SourceEvent<T>) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        bail!(
            "API responded {status}: {}",
            truncate_message(&body, MAX_BODY_CHARS)
        );
    }
}
