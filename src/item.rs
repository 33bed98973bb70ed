//! Cache item: a key/value pair annotated with tags and a lifetime.

use crate::errors::CacheResult;
use crate::keys;
use crate::marshal::StoredRecord;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// One cache entry as seen by the application.
///
/// An item produced by a fetch carries `is_hit = true` and remembers the tag
/// set it was stored with (`prev_tags`). Tags attached via [`tag`](Self::tag)
/// accumulate into the *current* tag set; at commit time the difference
/// between the two becomes the tag relations to add and remove. Re-saving a
/// fetched item without re-tagging it therefore detaches all of its tags.
#[derive(Debug, Clone)]
pub struct CacheItem {
    key: String,
    value: Value,
    tags: HashSet<String>,
    expiry: Option<i64>,
    default_lifetime: u64,
    prev_tags: HashSet<String>,
    is_hit: bool,
}

impl CacheItem {
    /// Create a detached item for the given key.
    ///
    /// Items obtained from [`TagAwarePool::get_item`](crate::TagAwarePool::get_item)
    /// are preferred since they carry the previously stored tag set; a
    /// detached item behaves like a miss.
    pub fn new(key: impl Into<String>) -> CacheResult<Self> {
        let key = key.into();
        keys::validate_key(&key)?;
        Ok(Self::miss(key, 0))
    }

    pub(crate) fn miss(key: impl Into<String>, default_lifetime: u64) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
            tags: HashSet::new(),
            expiry: None,
            default_lifetime,
            prev_tags: HashSet::new(),
            is_hit: false,
        }
    }

    pub(crate) fn from_record(
        key: impl Into<String>,
        record: StoredRecord,
        default_lifetime: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value: record.value,
            tags: HashSet::new(),
            expiry: None,
            default_lifetime,
            prev_tags: record.tags,
            is_hit: true,
        }
    }

    /// The user-visible key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this item was produced from a successful fetch.
    pub fn is_hit(&self) -> bool {
        self.is_hit
    }

    /// The stored value (`Null` for a miss that was never populated).
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Deserialize the stored value into a concrete type.
    pub fn value_as<T: DeserializeOwned>(&self) -> CacheResult<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    /// Replace the value.
    pub fn set(&mut self, value: Value) -> &mut Self {
        self.value = value;
        self
    }

    /// Serialize `value` and store it.
    pub fn set_serialized<T: Serialize>(&mut self, value: &T) -> CacheResult<&mut Self> {
        self.value = serde_json::to_value(value)?;
        Ok(self)
    }

    /// Attach tags to the item's current tag set. Duplicates are ignored.
    pub fn tag<I, S>(&mut self, tags: I) -> CacheResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            keys::validate_tag(&tag)?;
            self.tags.insert(tag);
        }
        Ok(self)
    }

    /// The item's current tag set (what the next save will persist).
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Set an absolute expiry, or clear it to fall back to the pool's
    /// default lifetime.
    pub fn expires_at(&mut self, at: Option<DateTime<Utc>>) -> &mut Self {
        self.expiry = at.map(|t| t.timestamp());
        self
    }

    /// Set an expiry relative to now, or clear it to fall back to the pool's
    /// default lifetime.
    pub fn expires_after(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.expiry = ttl.map(|d| Utc::now().timestamp() + d.as_secs() as i64);
        self
    }

    pub(crate) fn expiry(&self) -> Option<i64> {
        self.expiry
    }

    pub(crate) fn default_lifetime(&self) -> u64 {
        self.default_lifetime
    }

    pub(crate) fn set_default_lifetime(&mut self, seconds: u64) {
        self.default_lifetime = seconds;
    }

    /// The tag set this item was stored with when it was last fetched.
    ///
    /// Empty for a miss or a detached item. This is the baseline the next
    /// save diffs the current tag set against.
    pub fn previous_tags(&self) -> &HashSet<String> {
        &self.prev_tags
    }

    pub(crate) fn to_record(&self) -> StoredRecord {
        StoredRecord {
            value: self.value.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_item_is_a_miss() {
        let item = CacheItem::new("k").unwrap();
        assert!(!item.is_hit());
        assert_eq!(item.value(), &Value::Null);
        assert!(item.tags().is_empty());
        assert!(item.previous_tags().is_empty());
    }

    #[test]
    fn new_rejects_invalid_key() {
        assert!(CacheItem::new("bad:key").is_err());
    }

    #[test]
    fn fetched_item_remembers_stored_tags_but_starts_untagged() {
        let record = StoredRecord {
            value: json!("v"),
            tags: ["a", "b"].iter().map(|t| t.to_string()).collect(),
        };
        let item = CacheItem::from_record("k", record, 0);
        assert!(item.is_hit());
        assert!(item.tags().is_empty());
        assert_eq!(item.previous_tags().len(), 2);
    }

    #[test]
    fn tag_deduplicates_and_validates() {
        let mut item = CacheItem::new("k").unwrap();
        item.tag(["a", "b", "a"]).unwrap();
        assert_eq!(item.tags().len(), 2);
        assert!(item.tag(["bad{tag"]).is_err());
    }

    #[test]
    fn expires_after_sets_absolute_expiry() {
        let mut item = CacheItem::new("k").unwrap();
        let now = Utc::now().timestamp();
        item.expires_after(Some(Duration::from_secs(60)));
        let expiry = item.expiry().unwrap();
        assert!(expiry >= now + 59 && expiry <= now + 61);

        item.expires_after(None);
        assert!(item.expiry().is_none());
    }

    #[test]
    fn serialized_value_round_trip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Payload {
            name: String,
            count: u32,
        }

        let payload = Payload {
            name: "x".to_string(),
            count: 7,
        };
        let mut item = CacheItem::new("k").unwrap();
        item.set_serialized(&payload).unwrap();
        assert_eq!(item.value_as::<Payload>().unwrap(), payload);
    }
}
