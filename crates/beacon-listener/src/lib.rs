//! Reliable at-least-once delivery of block-feed events.
//!
//! A [`Listener`] combines two capabilities supplied by the caller, an
//! [`EventSource`] that fetches events newer than a block and an
//! [`EventHandler`] that consumes one event, with durable delivery tracking
//! in an [`EventStore`](beacon_store::EventStore).
//!
//! Two independent loops run once the listener is started:
//!
//! - the **poll loop** resumes from the highest recorded block, fetches
//!   newer events and delivers them in fetch order, every 10 seconds by
//!   default;
//! - the **retry loop** sweeps previously failed rows on an escalating
//!   schedule (1 minute, 30 minutes, then daily up to the tenth attempt),
//!   every 75 seconds by default.
//!
//! Both go through the same delivery pipeline: skip if a successful row
//! already exists for the event's natural key, otherwise invoke the handler,
//! record the outcome and report failures. Handler failures never escape
//! the pipeline. Infrastructure faults restart the affected loop under
//! supervision; nothing in this crate terminates the process.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = connector.connect().await?;
//! let listener = Listener::new(identity, source, handler, store, Arc::new(connector))
//!     .with_reporter(Arc::new(NoopReporter));
//! let handle = Arc::new(listener).start();
//! handle.join().await;
//! ```

mod error;
mod listener;
mod settings;
mod source;
mod supervisor;
pub mod telemetry;

pub use error::ListenerError;
pub use listener::{Attempt, DeliveryOutcome, Listener, PollReport, RetryReport};
pub use settings::ListenerSettings;
pub use source::{EventHandler, EventSource};
pub use supervisor::ListenerHandle;
pub use telemetry::{FaultContext, FaultOrigin, FaultReporter, HttpReporter, NoopReporter, Severity};
