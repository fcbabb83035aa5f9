//! Shared fixtures for listener integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use beacon_db::{create_pool, DbPool, DbRuntimeSettings};
use beacon_listener::{
    EventHandler, EventSource, FaultContext, FaultReporter, Listener, ListenerSettings,
};
use beacon_store::{
    queries, EventRecord, EventStore, FailedEvent, NewEventRecord, RetryOutcome, SqliteConnector,
    SqliteEventStore, StoreConnector, StoreError,
};
use beacon_types::{ListenerIdentity, NaturalKey, SourceEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub buyer: String,
}

pub type SaleEvent = SourceEvent<Sale>;

pub fn sale(id: &str, block_number: u64) -> SaleEvent {
    SourceEvent {
        id: id.to_string(),
        block_number,
        transaction_hash: format!("0xtx{block_number}"),
        data: Sale {
            buyer: format!("buyer-{id}"),
        },
    }
}

pub fn identity() -> ListenerIdentity {
    ListenerIdentity::new("sale-listener", "test")
}

// ── source ───────────────────────────────────────────────────────────

#[derive(Default)]
struct SourceState {
    events: Mutex<Vec<SaleEvent>>,
    calls: Mutex<Vec<u64>>,
    failures_left: AtomicUsize,
    ignore_bound: Mutex<bool>,
}

/// In-memory feed. Honors the lower bound unless told otherwise.
#[derive(Clone, Default)]
pub struct ScriptedSource(Arc<SourceState>);

impl ScriptedSource {
    pub fn push(&self, event: SaleEvent) {
        self.0.events.lock().unwrap().push(event);
    }

    /// Lower bounds the listener fetched with, in call order.
    pub fn calls(&self) -> Vec<u64> {
        self.0.calls.lock().unwrap().clone()
    }

    /// Makes the next `n` fetches fail.
    pub fn fail_next(&self, n: usize) {
        self.0.failures_left.store(n, Ordering::SeqCst);
    }

    /// Return every event regardless of the lower bound.
    pub fn ignore_bound(&self) {
        *self.0.ignore_bound.lock().unwrap() = true;
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    type Data = Sale;

    async fn fetch(&self, after_block: u64) -> anyhow::Result<Vec<SaleEvent>> {
        self.0.calls.lock().unwrap().push(after_block);

        let left = self.0.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.0.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("indexer unavailable");
        }

        let ignore_bound = *self.0.ignore_bound.lock().unwrap();
        Ok(self
            .0
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| ignore_bound || e.block_number > after_block)
            .cloned()
            .collect())
    }
}

// ── handler ──────────────────────────────────────────────────────────

#[derive(Default)]
struct HandlerState {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    stalls: Mutex<HashMap<String, Duration>>,
    completed: Mutex<Vec<String>>,
}

/// Records every invocation; fails, panics or stalls for configured event ids.
#[derive(Clone, Default)]
pub struct RecordingHandler(Arc<HandlerState>);

impl RecordingHandler {
    pub fn calls(&self) -> Vec<String> {
        self.0.calls.lock().unwrap().clone()
    }

    pub fn fail_on(&self, id: &str) {
        self.0.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.0.failing.lock().unwrap().remove(id);
    }

    pub fn panic_on(&self, id: &str) {
        self.0.panicking.lock().unwrap().insert(id.to_string());
    }

    /// Makes calls for `id` sleep for `pause` before finishing.
    pub fn stall_on(&self, id: &str, pause: Duration) {
        self.0.stalls.lock().unwrap().insert(id.to_string(), pause);
    }

    /// Ids whose call ran to a successful end.
    pub fn completed(&self) -> Vec<String> {
        self.0.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler<Sale> for RecordingHandler {
    async fn handle(&self, event: &SaleEvent) -> anyhow::Result<()> {
        self.0.calls.lock().unwrap().push(event.id.clone());

        if self.0.panicking.lock().unwrap().contains(&event.id) {
            panic!("handler exploded on {}", event.id);
        }
        if self.0.failing.lock().unwrap().contains(&event.id) {
            anyhow::bail!("api rejected {}", event.id);
        }
        let stall = self.0.stalls.lock().unwrap().get(&event.id).copied();
        if let Some(pause) = stall {
            tokio::time::sleep(pause).await;
        }
        self.0.completed.lock().unwrap().push(event.id.clone());
        Ok(())
    }
}

// ── reporter ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingReporter {
    pub faults: Mutex<Vec<(String, FaultContext)>>,
    pub messages: Mutex<Vec<(String, FaultContext)>>,
}

impl RecordingReporter {
    pub fn faults(&self) -> Vec<(String, FaultContext)> {
        self.faults.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, FaultContext)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaultReporter for RecordingReporter {
    async fn report_fault(&self, error: &str, ctx: &FaultContext) {
        self.faults.lock().unwrap().push((error.to_string(), ctx.clone()));
    }

    async fn report_message(&self, text: &str, ctx: &FaultContext) {
        self.messages.lock().unwrap().push((text.to_string(), ctx.clone()));
    }
}

// ── store wrappers ───────────────────────────────────────────────────

/// Delegates to SQLite but fails selected operations a set number of times.
pub struct FlakyStore {
    inner: SqliteEventStore,
    pub latest_failures: AtomicUsize,
    pub sweep_failures: AtomicUsize,
    pub insert_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteEventStore) -> Self {
        Self {
            inner,
            latest_failures: AtomicUsize::new(0),
            sweep_failures: AtomicUsize::new(0),
            insert_failures: AtomicUsize::new(0),
        }
    }
}

fn take_failure(counter: &AtomicUsize) -> Result<(), StoreError> {
    let left = counter.load(Ordering::SeqCst);
    if left > 0 {
        counter.store(left - 1, Ordering::SeqCst);
        return Err(StoreError::Join("injected store fault".to_string()));
    }
    Ok(())
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn insert_event(&self, record: NewEventRecord) -> Result<i64, StoreError> {
        take_failure(&self.insert_failures)?;
        self.inner.insert_event(record).await
    }

    async fn record_retry_outcome(&self, outcome: RetryOutcome) -> Result<(), StoreError> {
        self.inner.record_retry_outcome(outcome).await
    }

    async fn latest_block_number(&self, listener_id: &str) -> Result<Option<u64>, StoreError> {
        take_failure(&self.latest_failures)?;
        self.inner.latest_block_number(listener_id).await
    }

    async fn failed_events(
        &self,
        listener_id: &str,
        min_tries: u32,
        max_tries: u32,
        last_try_before: DateTime<Utc>,
    ) -> Result<Vec<FailedEvent>, StoreError> {
        take_failure(&self.sweep_failures)?;
        self.inner
            .failed_events(listener_id, min_tries, max_tries, last_try_before)
            .await
    }

    async fn was_handled(&self, key: NaturalKey<'_>) -> Result<bool, StoreError> {
        self.inner.was_handled(key).await
    }
}

/// Counts reconnects and hands out plain SQLite stores on the same file.
pub struct CountingConnector {
    inner: SqliteConnector,
    pub connects: AtomicUsize,
}

#[async_trait]
impl StoreConnector for CountingConnector {
    async fn connect(&self) -> Result<Arc<dyn EventStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect().await
    }
}

// ── harness ──────────────────────────────────────────────────────────

pub type SaleListener = Listener<ScriptedSource, RecordingHandler>;

pub struct Harness {
    pub dir: tempfile::TempDir,
    /// Separate pool on the listener's database file for seeding and
    /// inspecting rows.
    pub pool: DbPool,
    pub source: ScriptedSource,
    pub handler: RecordingHandler,
    pub reporter: Arc<RecordingReporter>,
    pub connector: Arc<CountingConnector>,
    pub listener: Arc<SaleListener>,
}

impl Harness {
    pub fn new(settings: ListenerSettings) -> Self {
        Self::build(settings, |sqlite| Arc::new(sqlite) as Arc<dyn EventStore>)
    }

    /// Builds a harness whose initial store is produced by `wrap`.
    pub fn build(
        settings: ListenerSettings,
        wrap: impl FnOnce(SqliteEventStore) -> Arc<dyn EventStore>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("listener.db");
        let sqlite_connector = SqliteConnector::new(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings::default(),
        );
        let sqlite = sqlite_connector.open().expect("open store");
        let pool = create_pool(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
            .expect("inspection pool");
        let connector = Arc::new(CountingConnector {
            inner: sqlite_connector,
            connects: AtomicUsize::new(0),
        });

        let source = ScriptedSource::default();
        let handler = RecordingHandler::default();
        let reporter = Arc::new(RecordingReporter::default());

        let listener = Listener::new(
            identity(),
            source.clone(),
            handler.clone(),
            wrap(sqlite),
            connector.clone(),
        )
        .with_reporter(reporter.clone())
        .with_settings(settings);

        Self {
            dir,
            pool,
            source,
            handler,
            reporter,
            connector,
            listener: Arc::new(listener),
        }
    }

    pub fn listener_id(&self) -> String {
        identity().to_string()
    }

    /// Every stored row of the test listener in insertion order.
    pub fn rows(&self) -> Vec<EventRecord> {
        let conn = self.pool.get().expect("connection");
        queries::list_events(&conn, &self.listener_id()).expect("list rows")
    }

    /// Inserts a failed row for `event` with the given retry state.
    pub fn seed_failed(&self, event: &SaleEvent, tries: u32, last_try_at: DateTime<Utc>) -> i64 {
        self.seed_failed_for(&self.listener_id(), event, tries, last_try_at)
    }

    pub fn seed_failed_for(
        &self,
        listener_id: &str,
        event: &SaleEvent,
        tries: u32,
        last_try_at: DateTime<Utc>,
    ) -> i64 {
        let conn = self.pool.get().expect("connection");
        let record = NewEventRecord::first_attempt(event, listener_id, false, last_try_at)
            .expect("record");
        let row_id = queries::insert_event(&conn, &record).expect("insert");
        queries::record_retry_outcome(
            &conn,
            &RetryOutcome {
                row_id,
                success: false,
                tries,
                attempted_at: last_try_at,
            },
        )
        .expect("set retry state");
        row_id
    }

    /// Inserts a successful first-attempt row for `event`.
    pub fn seed_handled(&self, event: &SaleEvent) -> i64 {
        let conn = self.pool.get().expect("connection");
        let record = NewEventRecord::first_attempt(event, &self.listener_id(), true, Utc::now())
            .expect("record");
        queries::insert_event(&conn, &record).expect("insert")
    }

    pub fn row(&self, row_id: i64) -> EventRecord {
        let conn = self.pool.get().expect("connection");
        queries::get_event(&conn, row_id)
            .expect("query")
            .expect("row exists")
    }
}

/// Settings with millisecond intervals for supervised-loop tests.
pub fn fast_settings() -> ListenerSettings {
    ListenerSettings {
        poll_interval: Duration::from_millis(20),
        retry_interval: Duration::from_millis(20),
        restart_pause: Duration::from_millis(10),
        ..ListenerSettings::default()
    }
}

/// Polls `check` until it returns true or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
