//! Storage drivers and their shared contract.
//!
//! ```text
//! BackendProvider (enum)              <- zero-cost dispatch, no vtable
//!   ├── Filesystem(FilesystemBackend)   <- files + tag-as-symlink directories
//!   └── Redis(RedisBackend)             <- SETEX records + tag sets
//! ```
//!
//! The pool never touches bytes or tag relations itself; it drives the hooks
//! defined by [`TagBackend`]. Ordering contract for implementations: within
//! one `do_save`, the item record for an id must be persisted (or its failure
//! observed) before the tag relations for that id are added.

pub mod filesystem;

#[cfg(feature = "backend-redis")]
pub mod redis;

pub use filesystem::FilesystemBackend;

#[cfg(feature = "backend-redis")]
pub use redis::RedisBackend;

use crate::config::PoolConfig;
use crate::errors::{CacheError, CacheResult};
use crate::marshal::{Marshaller, StoredRecord};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Tag relations keyed by namespaced tag id, each holding the item ids to
/// link or unlink. Computed at commit time, never persisted.
pub type TagData = HashMap<String, Vec<String>>;

/// The driver contract behind the tag-aware pool.
///
/// All ids and tag ids arriving here are already namespaced. Bulk operations
/// report per-id failures where the backend can distinguish them; an `Err`
/// from a bulk call means the whole batch is in an unknown state and the pool
/// falls back to per-item retries.
pub trait TagBackend: Send + Sync {
    /// Fetch stored records. Ids with no live record are simply absent from
    /// the result; corrupt or expired entries are dropped, never raised.
    fn do_fetch(
        &self,
        ids: &[String],
    ) -> impl Future<Output = CacheResult<Vec<(String, StoredRecord)>>> + Send;

    /// Existence probe without decoding the payload.
    fn do_have(&self, id: &str) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Persist one TTL bin of records plus the sideband tag relation deltas.
    /// `ttl` of `0` means no caller-requested expiry. Returns the ids that
    /// failed to persist (empty on full success).
    fn do_save(
        &self,
        records: &HashMap<String, StoredRecord>,
        ttl: u64,
        add_tag_data: &TagData,
        remove_tag_data: &TagData,
    ) -> impl Future<Output = CacheResult<Vec<String>>> + Send;

    /// Delete item records. Missing ids are tolerated; returns `false` only
    /// if a present record could not be removed.
    fn do_delete(&self, ids: &[String]) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Unlink tag relations left behind by deleted items. Best effort:
    /// readers already tolerate dangling relations.
    fn do_delete_tag_relations(
        &self,
        tag_data: &TagData,
    ) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Evict every item recorded under the given tag ids.
    fn do_invalidate(&self, tag_ids: &[String])
        -> impl Future<Output = CacheResult<bool>> + Send;

    /// Wipe everything stored under this pool's namespace.
    fn do_clear(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Check whether the storage medium is reachable and writable.
    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Driver name for logging and metrics labels.
    fn provider_name(&self) -> &'static str;
}

/// Concrete driver dispatch.
///
/// Enum dispatch keeps driver calls inlineable; the Redis variant only exists
/// when the `backend-redis` feature is enabled.
#[derive(Debug)]
pub enum BackendProvider {
    /// Filesystem driver
    Filesystem(Box<FilesystemBackend>),

    /// Redis driver
    #[cfg(feature = "backend-redis")]
    Redis(Box<RedisBackend>),
}

impl BackendProvider {
    /// Build the driver selected by `config.backend`.
    pub async fn from_config(
        config: &PoolConfig,
        marshaller: Arc<dyn Marshaller>,
    ) -> CacheResult<Self> {
        match config.backend.as_str() {
            "filesystem" => {
                let fs_config = config.filesystem.clone().unwrap_or_default();
                let backend = FilesystemBackend::new(
                    fs_config.directory.as_deref(),
                    &config.namespace,
                    marshaller,
                )
                .await?;
                Ok(Self::Filesystem(Box::new(backend)))
            }
            #[cfg(feature = "backend-redis")]
            "redis" => {
                let redis_config = config.redis.clone().ok_or_else(|| {
                    CacheError::InvalidConfiguration(
                        "backend \"redis\" selected but no [redis] section present".to_string(),
                    )
                })?;
                let backend =
                    RedisBackend::connect(&redis_config, &config.namespace, marshaller).await?;
                Ok(Self::Redis(Box::new(backend)))
            }
            #[cfg(not(feature = "backend-redis"))]
            "redis" => Err(CacheError::InvalidConfiguration(
                "backend \"redis\" requires the backend-redis feature".to_string(),
            )),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown cache backend {other:?}"
            ))),
        }
    }

    pub(crate) async fn do_fetch(
        &self,
        ids: &[String],
    ) -> CacheResult<Vec<(String, StoredRecord)>> {
        match self {
            Self::Filesystem(b) => b.do_fetch(ids).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_fetch(ids).await,
        }
    }

    pub(crate) async fn do_have(&self, id: &str) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.do_have(id).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_have(id).await,
        }
    }

    pub(crate) async fn do_save(
        &self,
        records: &HashMap<String, StoredRecord>,
        ttl: u64,
        add_tag_data: &TagData,
        remove_tag_data: &TagData,
    ) -> CacheResult<Vec<String>> {
        match self {
            Self::Filesystem(b) => b.do_save(records, ttl, add_tag_data, remove_tag_data).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_save(records, ttl, add_tag_data, remove_tag_data).await,
        }
    }

    pub(crate) async fn do_delete(&self, ids: &[String]) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.do_delete(ids).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_delete(ids).await,
        }
    }

    pub(crate) async fn do_delete_tag_relations(&self, tag_data: &TagData) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.do_delete_tag_relations(tag_data).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_delete_tag_relations(tag_data).await,
        }
    }

    pub(crate) async fn do_invalidate(&self, tag_ids: &[String]) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.do_invalidate(tag_ids).await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_invalidate(tag_ids).await,
        }
    }

    pub(crate) async fn do_clear(&self) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.do_clear().await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.do_clear().await,
        }
    }

    /// Remove expired records the storage medium will not reap on its own.
    /// Returns the number of records removed.
    pub(crate) async fn prune(&self) -> CacheResult<u64> {
        match self {
            Self::Filesystem(b) => b.prune().await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(_) => {
                // Redis expires records server-side via SETEX.
                tracing::debug!("redis backend has nothing to prune");
                Ok(0)
            }
        }
    }

    /// Check the underlying storage medium.
    pub async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Filesystem(b) => b.health_check().await,
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.health_check().await,
        }
    }

    /// The active driver's name.
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Filesystem(b) => b.provider_name(),
            #[cfg(feature = "backend-redis")]
            Self::Redis(b) => b.provider_name(),
        }
    }
}
