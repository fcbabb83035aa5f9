//! The `beacon` binary's building blocks.
//!
//! A runner listener reads events from a GraphQL indexer ([`GraphQlSource`]),
//! forwards each one to an HTTP API ([`WebhookHandler`]) and tracks delivery
//! in a SQLite event store.

pub mod config;
pub mod graphql;
pub mod webhook;

pub use config::{load_config, Config, ConfigError};
pub use graphql::{EventFields, GraphQlSource};
pub use webhook::WebhookHandler;

use beacon_listener::{FaultReporter, HttpReporter, Listener, NoopReporter};
use beacon_store::{SqliteConnector, StoreConnector, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// The listener the binary runs.
pub type RunnerListener = Listener<GraphQlSource, WebhookHandler>;

/// Errors that can occur while assembling a listener from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open event store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Connects the store and wires source, handler and reporter per `config`.
///
/// # Errors
///
/// Returns `StartupError` if the store cannot be opened or migrated, or an
/// HTTP client cannot be built.
pub async fn build_listener(config: &Config) -> Result<RunnerListener, StartupError> {
    let connector = SqliteConnector::new(&config.database.path, config.db_settings());
    let store = connector.connect().await?;

    let source = GraphQlSource::new(
        &config.listener.graph_url,
        &config.source.entity,
        config.source.fields.clone(),
    )?;
    let handler = WebhookHandler::new(&config.listener.api_url, &config.handler.path)?;

    let reporter: Arc<dyn FaultReporter> = match &config.telemetry.dsn {
        Some(dsn) => Arc::new(HttpReporter::new(dsn, &config.listener.environment)?),
        None => Arc::new(NoopReporter),
    };

    tracing::info!(
        listener = %config.identity(),
        graph_url = %config.listener.graph_url,
        handler_url = handler.url(),
        telemetry = config.telemetry.dsn.is_some(),
        "listener assembled"
    );

    Ok(Listener::new(
        config.identity(),
        source,
        handler,
        store,
        Arc::new(connector),
    )
    .with_reporter(reporter)
    .with_settings(config.listener_settings()))
}
