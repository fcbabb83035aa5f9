//! Shared types for the Beacon listener workspace.
//!
//! This crate holds the vocabulary every other Beacon crate speaks: who a
//! listener is ([`ListenerIdentity`]), what an observed event looks like
//! ([`SourceEvent`]), how events are de-duplicated ([`NaturalKey`]) and when
//! failed events become eligible for another attempt ([`RetrySchedule`]).
//!
//! Nothing here touches the database or the network. Keeping the types in a
//! leaf crate lets the store, the engine and the runner agree on shapes
//! without depending on each other.

use serde::{Deserialize, Serialize};

mod event;
mod schedule;

pub use event::SourceEvent;
pub use schedule::{RetryBand, RetrySchedule, ScheduleError};

/// Identity of one logical listener.
///
/// Every stored row and every retry sweep is partitioned by the rendered
/// identity, so two listener processes may share one store as long as their
/// identities differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerIdentity {
    /// Configured instance name, e.g. `sale-listener`.
    pub instance_name: String,
    /// Environment tag, e.g. `production`.
    pub environment: String,
}

impl ListenerIdentity {
    pub fn new(instance_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            environment: environment.into(),
        }
    }
}

impl std::fmt::Display for ListenerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.instance_name, self.environment)
    }
}

/// The de-duplication identity of an event.
///
/// Distinct from the store's row id: two rows can never legitimately share a
/// natural key with `success = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaturalKey<'a> {
    /// Rendered [`ListenerIdentity`].
    pub listener_id: &'a str,
    pub transaction_hash: &'a str,
    pub block_number: u64,
    /// Source-assigned event id.
    pub event_id: &'a str,
}
