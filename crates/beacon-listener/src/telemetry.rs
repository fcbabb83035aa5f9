//! Fault and message reporting.
//!
//! Reporting is best-effort. A reporter never returns an error to the
//! engine; its own failures are logged at `warn` and dropped.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Severity attached to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A loop stopped and is being restarted.
    Fatal,
    /// A delivery failed; the listener keeps running.
    Error,
}

/// Where a reported fault originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOrigin {
    PollLoop,
    RetryLoop,
    /// Store or payload fault while delivering one event of a batch.
    Delivery,
    /// The caller's handler returned an error or panicked.
    Handler,
}

/// Context sent along with every report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultContext {
    /// Configured instance name.
    pub listener: String,
    /// Rendered listener identity.
    pub identity: String,
    pub origin: FaultOrigin,
    pub severity: Severity,
    /// Attempt number the fault occurred on, for delivery faults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tries: Option<u32>,
    /// The event being delivered, for delivery faults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
}

/// Sink for faults and free-form messages.
#[async_trait]
pub trait FaultReporter: Send + Sync {
    async fn report_fault(&self, error: &str, ctx: &FaultContext);
    async fn report_message(&self, text: &str, ctx: &FaultContext);
}

/// Reporter used when no telemetry DSN is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

#[async_trait]
impl FaultReporter for NoopReporter {
    async fn report_fault(&self, _error: &str, _ctx: &FaultContext) {}
    async fn report_message(&self, _text: &str, _ctx: &FaultContext) {}
}

/// JSON envelope POSTed to the telemetry endpoint.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    kind: &'static str,
    level: Severity,
    message: &'a str,
    environment: &'a str,
    context: &'a FaultContext,
}

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Posts reports as JSON to an HTTP ingest endpoint (the telemetry DSN).
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: Client,
    dsn: String,
    environment: String,
}

impl HttpReporter {
    /// Creates a reporter for `dsn`, tagging every report with `environment`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(dsn: impl Into<String>, environment: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            dsn: dsn.into(),
            environment: environment.into(),
        })
    }

    async fn send(&self, kind: &'static str, message: &str, ctx: &FaultContext) {
        let envelope = Envelope {
            kind,
            level: ctx.severity,
            message,
            environment: &self.environment,
            context: ctx,
        };

        let result = self
            .client
            .post(&self.dsn)
            .json(&envelope)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        if let Err(e) = result {
            tracing::warn!(
                listener = %ctx.identity,
                error = %e,
                "failed to deliver telemetry report"
            );
        }
    }
}

#[async_trait]
impl FaultReporter for HttpReporter {
    async fn report_fault(&self, error: &str, ctx: &FaultContext) {
        self.send("exception", error, ctx).await;
    }

    async fn report_message(&self, text: &str, ctx: &FaultContext) {
        self.send("message", text, ctx).await;
    }
}

/// Shortens `message` to at most `max_chars` characters for logs and reports.
pub fn truncate_message(message: &str, max_chars: usize) -> &str {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}
