//! Value marshalling: the codec seam between the pool and its drivers.
//!
//! Drivers persist a [`StoredRecord`] per item: the opaque value plus the tag
//! names attached at save time. Tag-operation metadata (adds/removes) is
//! computed at commit time and travels sideband to the save hook; it is never
//! part of the persisted record.

use crate::errors::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// What a driver actually persists for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Opaque application payload
    pub value: serde_json::Value,

    /// Tag names attached to the item when it was last saved (raw names,
    /// not namespaced tag ids)
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub tags: HashSet<String>,
}

/// Codec turning stored records into persisted bytes and back.
///
/// `encode` reports per-id failures instead of failing wholesale so a commit
/// can persist the records that did marshal and surface the rest as failed
/// ids. Implementations are injected as `Arc<dyn Marshaller>`.
pub trait Marshaller: Send + Sync + std::fmt::Debug {
    /// Encode each record. Returns the encoded bytes by id alongside the ids
    /// whose encoding failed.
    fn encode(
        &self,
        records: &HashMap<String, StoredRecord>,
    ) -> (HashMap<String, Vec<u8>>, Vec<String>);

    /// Decode a persisted record.
    fn decode(&self, bytes: &[u8]) -> CacheResult<StoredRecord>;
}

/// Default codec: JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn encode(
        &self,
        records: &HashMap<String, StoredRecord>,
    ) -> (HashMap<String, Vec<u8>>, Vec<String>) {
        let mut encoded = HashMap::with_capacity(records.len());
        let mut failed = Vec::new();

        for (id, record) in records {
            match serde_json::to_vec(record) {
                Ok(bytes) => {
                    encoded.insert(id.clone(), bytes);
                }
                Err(error) => {
                    warn!(id = %id, error = %error, "failed to marshal cache value");
                    failed.push(id.clone());
                }
            }
        }

        (encoded, failed)
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<StoredRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::SerializationError(format!("unmarshal failed: {e}")))
    }
}
