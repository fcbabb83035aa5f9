//! The listener: delivery pipeline plus one poll cycle and one retry cycle.
//!
//! The loops and their supervision live in [`crate::supervisor`]; this
//! module holds everything a single cycle does, so tests can drive cycles
//! one at a time.

use beacon_store::{EventStore, NewEventRecord, RetryOutcome, StoreConnector};
use beacon_types::{ListenerIdentity, RetryBand, SourceEvent};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::task::JoinSet;

use crate::error::ListenerError;
use crate::settings::ListenerSettings;
use crate::source::{EventHandler, EventSource};
use crate::telemetry::{
    truncate_message, FaultContext, FaultOrigin, FaultReporter, NoopReporter, Severity,
};

/// Maximum characters of an error message carried into logs and reports.
pub(crate) const MAX_ERROR_CHARS: usize = 200;

/// Whether a delivery is the first one or a retry of a stored failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Inserts a new row with `tries = 1`.
    First,
    /// Updates row `row_id`, which has `previous_tries` attempts so far.
    Retry { row_id: i64, previous_tries: u32 },
}

impl Attempt {
    /// 1-based number of the attempt being made.
    pub fn number(&self) -> u32 {
        match self {
            Self::First => 1,
            Self::Retry { previous_tries, .. } => previous_tries.saturating_add(1),
        }
    }
}

/// What a single delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A successful row already existed; the handler was not called and
    /// nothing was written.
    Skipped,
    /// The handler succeeded and the outcome was stored.
    Delivered,
    /// The handler failed and the failure was stored.
    Failed,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Exclusive lower bound passed to the source.
    pub after_block: u64,
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Events whose delivery hit a store fault; they were not recorded.
    pub errored: usize,
}

/// Counters for one retry cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Rows selected across all sweeps.
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Rows whose stored payload no longer decodes; counted as failed tries.
    pub undecodable: usize,
}

impl PollReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Skipped => self.skipped += 1,
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

impl RetryReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Skipped => self.skipped += 1,
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

/// The store both loops share. The poll loop's supervisor swaps it after a
/// reconnect; readers clone the current `Arc` and never hold the lock
/// across an await.
#[derive(Clone)]
pub(crate) struct SharedStore(Arc<RwLock<Arc<dyn EventStore>>>);

impl SharedStore {
    fn new(store: Arc<dyn EventStore>) -> Self {
        Self(Arc::new(RwLock::new(store)))
    }

    pub(crate) fn current(&self) -> Arc<dyn EventStore> {
        match self.0.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub(crate) fn replace(&self, store: Arc<dyn EventStore>) {
        match self.0.write() {
            Ok(mut guard) => *guard = store,
            Err(poisoned) => *poisoned.into_inner() = store,
        }
    }
}

/// A reliable listener over one event source and one handler.
///
/// Build it with [`Listener::new`], then either drive single cycles with
/// [`poll_once`](Self::poll_once) and [`retry_once`](Self::retry_once) or
/// run both loops under supervision with [`start`](Self::start).
pub struct Listener<S, H> {
    pub(crate) identity: ListenerIdentity,
    pub(crate) listener_id: String,
    source: Arc<S>,
    handler: Arc<H>,
    pub(crate) store: SharedStore,
    pub(crate) connector: Arc<dyn StoreConnector>,
    pub(crate) reporter: Arc<dyn FaultReporter>,
    pub(crate) settings: ListenerSettings,
}

impl<S, H> Listener<S, H>
where
    S: EventSource + 'static,
    S::Data: Serialize + DeserializeOwned + Send + Sync + 'static,
    H: EventHandler<S::Data> + 'static,
{
    /// Creates a listener with default settings and no telemetry.
    ///
    /// `store` is the initial connection; `connector` is used to replace it
    /// when the poll loop restarts after a fault.
    pub fn new(
        identity: ListenerIdentity,
        source: S,
        handler: H,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        let listener_id = identity.to_string();
        Self {
            identity,
            listener_id,
            source: Arc::new(source),
            handler: Arc::new(handler),
            store: SharedStore::new(store),
            connector,
            reporter: Arc::new(NoopReporter),
            settings: ListenerSettings::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_settings(mut self, settings: ListenerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub(crate) fn fault_context(&self, origin: FaultOrigin, severity: Severity) -> FaultContext {
        FaultContext {
            listener: self.identity.instance_name.clone(),
            identity: self.listener_id.clone(),
            origin,
            severity,
            tries: None,
            event: None,
        }
    }

    /// Runs one event through the idempotency guard and the handler, then
    /// records the outcome.
    ///
    /// Handler errors and panics are recorded as a failed attempt and
    /// reported; they never surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Store` if the guard read or the outcome write
    /// fails.
    pub async fn deliver(
        &self,
        event: SourceEvent<S::Data>,
        attempt: Attempt,
    ) -> Result<DeliveryOutcome, ListenerError> {
        let store = self.store.current();
        self.deliver_with(store.as_ref(), event, attempt).await
    }

    async fn deliver_with(
        &self,
        store: &dyn EventStore,
        event: SourceEvent<S::Data>,
        attempt: Attempt,
    ) -> Result<DeliveryOutcome, ListenerError> {
        let tries = attempt.number();
        tracing::info!(
            listener = %self.identity,
            tries,
            block_number = event.block_number,
            transaction_hash = %event.transaction_hash,
            event_id = %event.id,
            "handling event"
        );

        if store.was_handled(event.natural_key(&self.listener_id)).await? {
            tracing::debug!(
                listener = %self.identity,
                event_id = %event.id,
                "skipping already handled event"
            );
            return Ok(DeliveryOutcome::Skipped);
        }

        let event = Arc::new(event);
        let result = self.invoke_handler(Arc::clone(&event)).await;

        match &result {
            Ok(()) => {
                tracing::info!(
                    listener = %self.identity,
                    tries,
                    transaction_hash = %event.transaction_hash,
                    "event handled"
                );
            }
            Err(message) => {
                let message = truncate_message(message, MAX_ERROR_CHARS);
                tracing::warn!(
                    listener = %self.identity,
                    tries,
                    transaction_hash = %event.transaction_hash,
                    error = message,
                    "event handling failed"
                );
                let mut ctx = self.fault_context(FaultOrigin::Handler, Severity::Error);
                ctx.tries = Some(tries);
                ctx.event = serde_json::to_value(event.as_ref()).ok();
                self.reporter.report_message(message, &ctx).await;
            }
        }

        let success = result.is_ok();
        let attempted_at = Utc::now();
        match attempt {
            Attempt::First => {
                let record =
                    NewEventRecord::first_attempt(event.as_ref(), &self.listener_id, success, attempted_at)?;
                store.insert_event(record).await?;
            }
            Attempt::Retry { row_id, .. } => {
                store
                    .record_retry_outcome(RetryOutcome {
                        row_id,
                        success,
                        tries,
                        attempted_at,
                    })
                    .await?;
            }
        }

        Ok(if success {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Failed
        })
    }

    /// Calls the handler on its own task so a panic is contained as a
    /// failed attempt. Delivery stays sequential: the task is awaited
    /// immediately, and it is aborted if this future is dropped.
    async fn invoke_handler(&self, event: Arc<SourceEvent<S::Data>>) -> Result<(), String> {
        let handler = Arc::clone(&self.handler);
        let mut task = JoinSet::new();
        task.spawn(async move { handler.handle(&event).await });

        match task.join_next().await {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(format!("{e:#}")),
            Some(Err(join)) if join.is_panic() => Err(format!("handler panicked: {join}")),
            Some(Err(join)) => Err(format!("handler task failed: {join}")),
            None => Err("handler task was not spawned".to_string()),
        }
    }

    /// One poll cycle: resume from the latest recorded block, fetch newer
    /// events and deliver them in fetch order.
    ///
    /// A store fault while delivering one event is logged and reported and
    /// the rest of the batch is still attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the resume point cannot be read or the source
    /// fails; the poll loop's supervisor restarts the loop.
    pub async fn poll_once(&self) -> Result<PollReport, ListenerError> {
        let store = self.store.current();
        let after_block = store
            .latest_block_number(&self.listener_id)
            .await?
            .unwrap_or(0);

        let events = self
            .source
            .fetch(after_block)
            .await
            .map_err(ListenerError::Fetch)?;

        let mut report = PollReport {
            after_block,
            fetched: events.len(),
            ..PollReport::default()
        };

        if events.is_empty() {
            tracing::debug!(listener = %self.identity, after_block, "no new events");
            return Ok(report);
        }

        for event in events {
            let event_id = event.id.clone();
            match self.deliver_with(store.as_ref(), event, Attempt::First).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.errored += 1;
                    let message = e.to_string();
                    let message = truncate_message(&message, MAX_ERROR_CHARS);
                    tracing::error!(
                        listener = %self.identity,
                        event_id = %event_id,
                        error = message,
                        "failed to deliver event"
                    );
                    let ctx = self.fault_context(FaultOrigin::Delivery, Severity::Error);
                    self.reporter.report_fault(message, &ctx).await;
                }
            }
        }

        tracing::info!(
            listener = %self.identity,
            after_block,
            fetched = report.fetched,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "batch queried and handled"
        );

        Ok(report)
    }

    /// One retry cycle: run every sweep of the schedule in order and
    /// re-deliver each selected row once.
    ///
    /// # Errors
    ///
    /// Any store fault aborts the cycle; the retry loop's supervisor
    /// restarts the loop.
    pub async fn retry_once(&self) -> Result<RetryReport, ListenerError> {
        let store = self.store.current();
        let now = Utc::now();
        let mut report = RetryReport::default();
        let mut retried: HashSet<i64> = HashSet::new();

        for band in self.settings.schedule.bands() {
            let due = store
                .failed_events(
                    &self.listener_id,
                    band.min_tries,
                    band.max_tries,
                    sweep_cutoff(now, band),
                )
                .await?;

            for row in due {
                if !retried.insert(row.id) {
                    continue;
                }
                report.selected += 1;

                let attempt = Attempt::Retry {
                    row_id: row.id,
                    previous_tries: row.tries,
                };

                let event = match row.payload::<S::Data>() {
                    Ok(event) => event,
                    Err(e) => {
                        self.record_undecodable(store.as_ref(), row.id, attempt, &e)
                            .await?;
                        report.undecodable += 1;
                        continue;
                    }
                };

                let outcome = self.deliver_with(store.as_ref(), event, attempt).await?;
                report.record(outcome);
            }
        }

        if report.selected > 0 {
            tracing::info!(
                listener = %self.identity,
                selected = report.selected,
                delivered = report.delivered,
                failed = report.failed,
                "retried failed events"
            );
        }

        Ok(report)
    }

    /// A stored payload that no longer matches the listener's event shape
    /// can never succeed; count the attempt so the row leaves the schedule.
    async fn record_undecodable(
        &self,
        store: &dyn EventStore,
        row_id: i64,
        attempt: Attempt,
        error: &serde_json::Error,
    ) -> Result<(), ListenerError> {
        let tries = attempt.number();
        let message = format!("stored payload of row {row_id} does not decode: {error}");
        tracing::warn!(listener = %self.identity, row_id, tries, error = %error, "undecodable payload");

        let mut ctx = self.fault_context(FaultOrigin::Delivery, Severity::Error);
        ctx.tries = Some(tries);
        self.reporter.report_message(&message, &ctx).await;

        store
            .record_retry_outcome(RetryOutcome {
                row_id,
                success: false,
                tries,
                attempted_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

/// Latest `last_try_at` a row may have to be due in `band`.
fn sweep_cutoff(now: DateTime<Utc>, band: &RetryBand) -> DateTime<Utc> {
    i64::try_from(band.min_age_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
