//! The observed-event envelope shared by sources, handlers and the store.

use serde::{Deserialize, Deserializer, Serialize};

use crate::NaturalKey;

/// One event as returned by an event source.
///
/// The three envelope fields are mandatory for every listener; `data`
/// carries the listener-specific fields and is flattened into the same JSON
/// object, so the serialized form is `{"id", "blockNumber",
/// "transactionHash", ...data}`. This is also the shape persisted as the
/// row payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent<T> {
    /// Source-assigned event id.
    pub id: String,
    /// Position in the source's total order.
    #[serde(deserialize_with = "block_number_from_any")]
    pub block_number: u64,
    /// Source-assigned correlation hash.
    pub transaction_hash: String,
    /// Listener-specific fields.
    #[serde(flatten)]
    pub data: T,
}

impl<T> SourceEvent<T> {
    /// Returns the de-duplication key of this event under `listener_id`.
    pub fn natural_key<'a>(&'a self, listener_id: &'a str) -> NaturalKey<'a> {
        NaturalKey {
            listener_id,
            transaction_hash: &self.transaction_hash,
            block_number: self.block_number,
            event_id: &self.id,
        }
    }
}

/// Indexers commonly emit block numbers as decimal strings; accept both.
fn block_number_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid block number: {s:?}"))),
    }
}
