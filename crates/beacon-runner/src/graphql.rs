//! Event source backed by a block indexer's GraphQL endpoint.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use beacon_listener::EventSource;
use beacon_types::SourceEvent;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Extra event fields, keyed by their GraphQL names.
pub type EventFields = Map<String, Value>;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Fetches one entity collection ordered by block number.
#[derive(Debug, Clone)]
pub struct GraphQlSource {
    client: Client,
    url: String,
    entity: String,
    fields: Vec<String>,
}

impl GraphQlSource {
    pub fn new(
        url: impl Into<String>,
        entity: impl Into<String>,
        fields: Vec<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            entity: entity.into(),
            fields,
        })
    }

    /// Query text selecting every entity above `after_block`.
    pub fn query(&self, after_block: u64) -> String {
        let mut selection = String::from("id blockNumber transactionHash");
        for field in &self.fields {
            selection.push(' ');
            selection.push_str(field);
        }
        format!(
            "{{ {entity}(where: {{ blockNumber_gt: {after_block} }}, orderBy: blockNumber, orderDirection: asc) {{ {selection} }} }}",
            entity = self.entity,
        )
    }
}

#[async_trait]
impl EventSource for GraphQlSource {
    type Data = EventFields;

    async fn fetch(&self, after_block: u64) -> anyhow::Result<Vec<SourceEvent<EventFields>>> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": self.query(after_block) }))
            .send()
            .await
            .context("graph query request failed")?
            .error_for_status()
            .context("graph query rejected")?;

        let body: GraphQlResponse = response
            .json()
            .await
            .context("graph response is not valid JSON")?;

        if !body.errors.is_empty() {
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            bail!("graph query returned errors: {}", messages.join("; "));
        }

        let entities = body
            .data
            .and_then(|mut data| data.get_mut(&self.entity).map(Value::take))
            .ok_or_else(|| anyhow!("graph response has no '{}' collection", self.entity))?;

        let events: Vec<SourceEvent<EventFields>> = serde_json::from_value(entities)
            .with_context(|| format!("malformed '{}' entities", self.entity))?;

        tracing::debug!(after_block, count = events.len(), "fetched events from graph");
        Ok(events)
    }
}
