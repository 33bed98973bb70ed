//! The tag-aware pool: deferred writes, commit protocol, public API.
//!
//! The pool owns the deferred buffer and everything derived from it at
//! commit time: namespaced ids, TTL bins, and the tag-relation deltas
//! computed from each item's previous tag set. Storage is delegated to a
//! [`BackendProvider`]; per-item failure recovery happens here so both
//! drivers stay simple.
//!
//! A pool instance is single-owner: every operation that can touch the
//! buffer takes `&mut self`, so sharing one instance across tasks without
//! synchronisation is rejected at compile time. The storage behind it is
//! shared freely between pools and processes.

use crate::backend::{BackendProvider, TagData};
use crate::config::PoolConfig;
use crate::errors::{CacheError, CacheResult};
use crate::item::CacheItem;
use crate::keys;
use crate::marshal::{JsonMarshaller, Marshaller, StoredRecord};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tag-aware cache pool.
///
/// Items saved through the pool are buffered until [`commit`](Self::commit),
/// which runs implicitly on [`save`](Self::save) and before any read while
/// the buffer is non-empty, so a writer always observes its own writes.
#[derive(Debug)]
pub struct TagAwarePool {
    backend: BackendProvider,
    key_prefix: String,
    default_lifetime: u64,
    deferred: HashMap<String, CacheItem>,
}

impl TagAwarePool {
    /// Wrap an already-built driver.
    pub fn new(
        backend: BackendProvider,
        namespace: &str,
        default_lifetime: Duration,
    ) -> CacheResult<Self> {
        let key_prefix = keys::normalize_namespace(namespace)?;
        Ok(Self {
            backend,
            key_prefix,
            default_lifetime: default_lifetime.as_secs(),
            deferred: HashMap::new(),
        })
    }

    /// Build the pool and its driver from configuration, using the default
    /// JSON marshaller.
    pub async fn from_config(config: &PoolConfig) -> CacheResult<Self> {
        Self::from_config_with_marshaller(config, Arc::new(JsonMarshaller)).await
    }

    /// Build the pool from configuration with a custom codec.
    pub async fn from_config_with_marshaller(
        config: &PoolConfig,
        marshaller: Arc<dyn Marshaller>,
    ) -> CacheResult<Self> {
        let backend = BackendProvider::from_config(config, marshaller).await?;
        Self::new(
            backend,
            &config.namespace,
            Duration::from_secs(config.default_lifetime_seconds),
        )
    }

    /// Fetch one item.
    ///
    /// Commits the deferred buffer first whenever it is non-empty. Backend
    /// and codec failures are logged and reported as a miss, never raised;
    /// only an invalid key is an error.
    pub async fn get_item(&mut self, key: &str) -> CacheResult<CacheItem> {
        keys::validate_key(key)?;
        self.commit_before_read().await;

        let id = keys::item_id(&self.key_prefix, key);
        match self.backend.do_fetch(std::slice::from_ref(&id)).await {
            Ok(found) => {
                for (found_id, record) in found {
                    if found_id == id {
                        debug!(key = key, "cache hit");
                        return Ok(CacheItem::from_record(key, record, self.default_lifetime));
                    }
                }
                debug!(key = key, "cache miss");
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache fetch failed, treating as miss");
            }
        }
        Ok(CacheItem::miss(key, self.default_lifetime))
    }

    /// Fetch many items in one backend round trip.
    ///
    /// Hits come first in fetch order, then a miss item for every remaining
    /// key in input order. Duplicate keys are collapsed to one item.
    pub async fn get_items(&mut self, keys: &[&str]) -> CacheResult<Vec<CacheItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            keys::validate_key(key)?;
        }
        self.commit_before_read().await;

        let mut ids = Vec::with_capacity(keys.len());
        let mut key_by_id: HashMap<String, &str> = HashMap::with_capacity(keys.len());
        for key in keys {
            let id = keys::item_id(&self.key_prefix, key);
            if !key_by_id.contains_key(&id) {
                key_by_id.insert(id.clone(), key);
                ids.push(id);
            }
        }

        let fetched = match self.backend.do_fetch(&ids).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "bulk cache fetch failed, treating all keys as misses");
                Vec::new()
            }
        };

        let mut items = Vec::with_capacity(ids.len());
        let mut hit_ids = HashSet::with_capacity(fetched.len());
        for (id, record) in fetched {
            if let Some(key) = key_by_id.get(&id) {
                items.push(CacheItem::from_record(*key, record, self.default_lifetime));
                hit_ids.insert(id);
            }
        }
        for id in &ids {
            if !hit_ids.contains(id) {
                items.push(CacheItem::miss(key_by_id[id], self.default_lifetime));
            }
        }
        Ok(items)
    }

    /// Check whether a live record exists for `key` without decoding it.
    pub async fn has_item(&mut self, key: &str) -> CacheResult<bool> {
        keys::validate_key(key)?;
        if self.deferred.contains_key(key) {
            if let Err(e) = self.commit().await {
                warn!(error = %e, "implicit commit before existence check failed");
            }
        }
        let id = keys::item_id(&self.key_prefix, key);
        match self.backend.do_have(&id).await {
            Ok(present) => Ok(present),
            Err(e) => {
                warn!(key = key, error = %e, "existence check failed, treating as miss");
                Ok(false)
            }
        }
    }

    /// Buffer an item for the next commit.
    pub fn save_deferred(&mut self, mut item: CacheItem) {
        if item.default_lifetime() == 0 {
            item.set_default_lifetime(self.default_lifetime);
        }
        self.deferred.insert(item.key().to_string(), item);
    }

    /// Buffer an item and commit immediately.
    pub async fn save(&mut self, item: CacheItem) -> CacheResult<bool> {
        self.save_deferred(item);
        self.commit().await
    }

    /// Drain the deferred buffer to the backend.
    ///
    /// Items are binned by effective TTL; items whose expiry already passed
    /// are deleted instead of written. Each bin is saved in one bulk call,
    /// and a bin that fails opaquely is replayed entry by entry. Returns
    /// `true` iff every buffered item was persisted; only fatal
    /// configuration errors are raised.
    pub async fn commit(&mut self) -> CacheResult<bool> {
        if self.deferred.is_empty() {
            return Ok(true);
        }

        struct PendingSave {
            record: StoredRecord,
            adds: Vec<String>,
            removes: Vec<String>,
        }

        let items: Vec<CacheItem> = self.deferred.drain().map(|(_, item)| item).collect();
        let now = Utc::now().timestamp();

        let mut expired: Vec<String> = Vec::new();
        let mut bins: HashMap<u64, HashMap<String, PendingSave>> = HashMap::new();

        for item in items {
            let id = keys::item_id(&self.key_prefix, item.key());
            let ttl = match effective_ttl(item.expiry(), item.default_lifetime(), now) {
                TtlBin::Expired => {
                    expired.push(id);
                    continue;
                }
                TtlBin::Live(ttl) => ttl,
            };
            let (added, removed) = tag_diff(item.tags(), item.previous_tags());
            let pending = PendingSave {
                record: item.to_record(),
                adds: added
                    .into_iter()
                    .map(|tag| keys::tag_id(&self.key_prefix, &tag))
                    .collect(),
                removes: removed
                    .into_iter()
                    .map(|tag| keys::tag_id(&self.key_prefix, &tag))
                    .collect(),
            };
            bins.entry(ttl).or_default().insert(id, pending);
        }

        let mut ok = true;

        // Saving an already-expired item is an immediate delete.
        if !expired.is_empty() {
            match self.backend.do_delete(&expired).await {
                Ok(deleted) => ok &= deleted,
                Err(e) => {
                    warn!(error = %e, "failed to delete expired entries during commit");
                    ok = false;
                }
            }
        }

        for (ttl, pending) in bins {
            let mut records: HashMap<String, StoredRecord> =
                HashMap::with_capacity(pending.len());
            let mut add_tag_data = TagData::new();
            let mut remove_tag_data = TagData::new();
            for (id, save) in pending {
                for tag_id in save.adds {
                    add_tag_data.entry(tag_id).or_default().push(id.clone());
                }
                for tag_id in save.removes {
                    remove_tag_data.entry(tag_id).or_default().push(id.clone());
                }
                records.insert(id, save.record);
            }

            let mut retries: Vec<String> = Vec::new();
            match self
                .backend
                .do_save(&records, ttl, &add_tag_data, &remove_tag_data)
                .await
            {
                Ok(failed) => {
                    for id in failed {
                        warn!(id = %id, "failed to save cache entry");
                        ok = false;
                    }
                }
                Err(e @ CacheError::InvalidConfiguration(_)) => return Err(e),
                Err(e) if records.len() > 1 => {
                    // No per-item diagnostics from an opaque bulk failure;
                    // replay the bin one entry at a time.
                    debug!(error = %e, count = records.len(), "bulk save failed, retrying entries individually");
                    retries.extend(records.keys().cloned());
                }
                Err(e) => {
                    warn!(error = %e, "failed to save cache entry");
                    ok = false;
                }
            }

            for id in retries {
                let Some(record) = records.get(&id) else { continue };
                let mut single = HashMap::with_capacity(1);
                single.insert(id.clone(), record.clone());
                let adds = filter_tag_data(&add_tag_data, &id);
                let removes = filter_tag_data(&remove_tag_data, &id);
                match self.backend.do_save(&single, ttl, &adds, &removes).await {
                    Ok(failed) if failed.is_empty() => {}
                    Ok(_) => {
                        warn!(id = %id, "failed to save cache entry");
                        ok = false;
                    }
                    Err(e @ CacheError::InvalidConfiguration(_)) => return Err(e),
                    Err(e) => {
                        warn!(id = %id, error = %e, "failed to save cache entry");
                        ok = false;
                    }
                }
            }
        }

        Ok(ok)
    }

    /// Delete one item and its tag relations.
    pub async fn delete_item(&mut self, key: &str) -> CacheResult<bool> {
        self.delete_items(&[key]).await
    }

    /// Delete many items and their tag relations.
    ///
    /// Unknown keys are tolerated. Returns `true` iff every present record
    /// was removed.
    pub async fn delete_items(&mut self, keys: &[&str]) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(true);
        }

        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            keys::validate_key(key)?;
            self.deferred.remove(*key);
            ids.push(keys::item_id(&self.key_prefix, key));
        }

        // Read the stored records first to learn which tag relations need
        // cleaning; a failed read only leaves dangling relations behind,
        // which readers tolerate.
        let mut tag_data = TagData::new();
        match self.backend.do_fetch(&ids).await {
            Ok(found) => {
                for (id, record) in found {
                    for tag in &record.tags {
                        tag_data
                            .entry(keys::tag_id(&self.key_prefix, tag))
                            .or_default()
                            .push(id.clone());
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read tag memberships before delete");
            }
        }

        let mut ok = true;
        match self.backend.do_delete(&ids).await {
            Ok(deleted) => ok &= deleted,
            Err(e) => {
                debug!(error = %e, "bulk delete failed, retrying entries individually");
                for id in &ids {
                    match self.backend.do_delete(std::slice::from_ref(id)).await {
                        Ok(deleted) => ok &= deleted,
                        Err(e) => {
                            warn!(id = %id, error = %e, "failed to delete cache entry");
                            ok = false;
                        }
                    }
                }
            }
        }

        if !tag_data.is_empty() {
            match self.backend.do_delete_tag_relations(&tag_data).await {
                Ok(cleaned) => ok &= cleaned,
                Err(e) => {
                    warn!(error = %e, "failed to clean tag relations");
                    ok = false;
                }
            }
        }

        Ok(ok)
    }

    /// Evict every item carrying any of the given tags.
    ///
    /// Returns `Ok(false)` without touching the backend when `tags` is
    /// empty. Invalidating a tag that was never used succeeds.
    pub async fn invalidate_tags(&mut self, tags: &[&str]) -> CacheResult<bool> {
        if tags.is_empty() {
            return Ok(false);
        }
        let mut seen = HashSet::with_capacity(tags.len());
        let mut tag_ids = Vec::with_capacity(tags.len());
        for tag in tags {
            keys::validate_tag(tag)?;
            if seen.insert(*tag) {
                tag_ids.push(keys::tag_id(&self.key_prefix, tag));
            }
        }
        self.backend.do_invalidate(&tag_ids).await
    }

    /// Discard the deferred buffer and wipe everything stored under this
    /// pool's namespace.
    pub async fn clear(&mut self) -> CacheResult<bool> {
        self.deferred.clear();
        self.backend.do_clear().await
    }

    /// Remove expired records the backend will not reap on its own.
    ///
    /// Redis expires records server-side, so this only does work on the
    /// filesystem driver. Returns the number of records removed.
    pub async fn prune(&mut self) -> CacheResult<u64> {
        self.backend.prune().await
    }

    /// Check the storage medium behind the pool.
    pub async fn health_check(&self) -> CacheResult<bool> {
        self.backend.health_check().await
    }

    /// The active driver's name, for logging and metrics labels.
    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// Flush pending writes before tearing the pool down.
    ///
    /// Best effort: failures are logged and swallowed. `Drop` cannot run an
    /// async commit, so call this on orderly shutdown paths.
    pub async fn close(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        if let Err(e) = self.commit().await {
            warn!(error = %e, "final cache flush failed");
        }
    }

    async fn commit_before_read(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        if let Err(e) = self.commit().await {
            warn!(error = %e, "implicit commit before read failed");
        }
    }
}

impl Drop for TagAwarePool {
    fn drop(&mut self) {
        if !self.deferred.is_empty() {
            warn!(
                pending = self.deferred.len(),
                "cache pool dropped with uncommitted deferred items; call close() to flush"
            );
        }
    }
}

enum TtlBin {
    Live(u64),
    Expired,
}

/// Effective TTL bin for one item: the default lifetime when no expiry is
/// set (`0` meaning no expiry), the remaining seconds when the expiry is in
/// the future, and `Expired` otherwise.
fn effective_ttl(expiry: Option<i64>, default_lifetime: u64, now: i64) -> TtlBin {
    match expiry {
        None => TtlBin::Live(default_lifetime),
        Some(at) if at > now => TtlBin::Live((at - now) as u64),
        Some(_) => TtlBin::Expired,
    }
}

/// Tag relations to add and remove for one item: `current \ previous` and
/// `previous \ current`.
fn tag_diff(
    current: &HashSet<String>,
    previous: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let added = current.difference(previous).cloned().collect();
    let removed = previous.difference(current).cloned().collect();
    (added, removed)
}

/// Restrict tag data to the entries referencing one id.
fn filter_tag_data(tag_data: &TagData, id: &str) -> TagData {
    tag_data
        .iter()
        .filter_map(|(tag_id, ids)| {
            ids.iter()
                .any(|i| i == id)
                .then(|| (tag_id.clone(), vec![id.to_string()]))
        })
        .collect()
}
