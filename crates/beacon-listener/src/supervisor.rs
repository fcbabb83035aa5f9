//! Supervised poll and retry loops.
//!
//! Each loop body runs as its own task inside a [`JoinSet`]. When the body
//! returns an error or panics, the supervisor logs and reports the fault and
//! starts a fresh body; no in-memory state carries over. There is no
//! restart limit.
//!
//! | Loop | After a fault |
//! |------|---------------|
//! | poll | pause `restart_pause`, reconnect the store, restart |
//! | retry | restart immediately |

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::sleep;

use crate::error::ListenerError;
use crate::listener::{Listener, MAX_ERROR_CHARS};
use crate::source::{EventHandler, EventSource};
use crate::telemetry::{truncate_message, FaultOrigin, Severity};

/// Handle to a started listener.
///
/// Dropping the handle leaves both loops running. [`abort`](Self::abort)
/// stops them, which is equivalent to terminating the process.
pub struct ListenerHandle {
    poll: JoinHandle<()>,
    retry: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops both loops, including any delivery in flight. A handler
    /// cancelled mid-call leaves no row for its event.
    pub fn abort(&self) {
        self.poll.abort();
        self.retry.abort();
    }

    /// Waits until both loops have stopped. They only stop when aborted.
    pub async fn join(self) {
        let _ = self.poll.await;
        let _ = self.retry.await;
    }
}

type LoopResult = Result<Infallible, ListenerError>;

impl<S, H> Listener<S, H>
where
    S: EventSource + 'static,
    S::Data: Serialize + DeserializeOwned + Send + Sync + 'static,
    H: EventHandler<S::Data> + 'static,
{
    /// Spawns the supervised poll loop and retry loop.
    pub fn start(self: Arc<Self>) -> ListenerHandle {
        tracing::info!(listener = %self.identity, "initialising");
        let poll = tokio::spawn(Arc::clone(&self).supervise_poll_loop());
        let retry = tokio::spawn(self.supervise_retry_loop());
        ListenerHandle { poll, retry }
    }

    async fn supervise_poll_loop(self: Arc<Self>) {
        loop {
            let mut run = JoinSet::new();
            run.spawn(Arc::clone(&self).run_poll_loop());
            let fault = describe_exit(run.join_next().await);

            self.report_loop_fault(FaultOrigin::PollLoop, Severity::Fatal, &fault)
                .await;

            sleep(self.settings.restart_pause).await;

            tracing::info!(
                listener = %self.identity,
                "reinitializing poll loop because of an error"
            );
            match self.connector.connect().await {
                Ok(store) => self.store.replace(store),
                Err(e) => {
                    // Keep the old store; the next fault retries the reconnect.
                    let message = format!("store reconnect failed: {e}");
                    self.report_loop_fault(FaultOrigin::PollLoop, Severity::Fatal, &message)
                        .await;
                }
            }
        }
    }

    async fn supervise_retry_loop(self: Arc<Self>) {
        loop {
            let mut run = JoinSet::new();
            run.spawn(Arc::clone(&self).run_retry_loop());
            let fault = describe_exit(run.join_next().await);

            self.report_loop_fault(FaultOrigin::RetryLoop, Severity::Error, &fault)
                .await;
            tokio::task::yield_now().await;
        }
    }

    async fn run_poll_loop(self: Arc<Self>) -> LoopResult {
        let every = self.settings.poll_liveness_every.max(1);
        let mut cycles: u64 = 0;
        loop {
            self.poll_once().await?;
            sleep(self.settings.poll_interval).await;
            if cycles % every == 0 {
                tracing::info!(listener = %self.identity, cycles, "still checking for new events");
            }
            cycles = cycles.wrapping_add(1);
        }
    }

    async fn run_retry_loop(self: Arc<Self>) -> LoopResult {
        let every = self.settings.retry_liveness_every.max(1);
        let mut cycles: u64 = 0;
        loop {
            self.retry_once().await?;
            sleep(self.settings.retry_interval).await;
            if cycles % every == 0 {
                tracing::info!(listener = %self.identity, cycles, "still retrying failed events");
            }
            cycles = cycles.wrapping_add(1);
        }
    }

    async fn report_loop_fault(&self, origin: FaultOrigin, severity: Severity, fault: &str) {
        let fault = truncate_message(fault, MAX_ERROR_CHARS);
        tracing::error!(
            listener = %self.identity,
            origin = ?origin,
            error = fault,
            "listener loop failed, restarting"
        );
        let ctx = self.fault_context(origin, severity);
        self.reporter.report_fault(fault, &ctx).await;
    }
}

fn describe_exit(exit: Option<Result<LoopResult, JoinError>>) -> String {
    match exit {
        Some(Ok(Ok(never))) => match never {},
        Some(Ok(Err(e))) => e.to_string(),
        Some(Err(join)) if join.is_panic() => {
            ListenerError::Task(format!("loop panicked: {join}")).to_string()
        }
        Some(Err(join)) => ListenerError::Task(join.to_string()).to_string(),
        None => ListenerError::Task("loop task was not spawned".to_string()).to_string(),
    }
}
