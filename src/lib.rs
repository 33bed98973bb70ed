#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # tagpool
//!
//! Tag-aware cache pool with filesystem and Redis backends.
//!
//! ## Overview
//!
//! Every cached item may carry a set of symbolic *tags*, and
//! [`TagAwarePool::invalidate_tags`] evicts every item bearing a tag in one
//! operation, without scanning the cache. The pool keeps reads cheap by
//! never consulting the tag relations on fetch: relations are maintained
//! transactionally at save time from each item's previous tag set, and only
//! walked during invalidation.
//!
//! ## Architecture
//!
//! ```text
//! TagAwarePool                 <- deferred buffer, commit, tag diffs, retry
//!   └── BackendProvider (enum) <- zero-cost driver dispatch
//!         ├── FilesystemBackend  <- sharded files + tag-as-symlink dirs
//!         └── RedisBackend       <- SETEX records + tag sets (backend-redis)
//! ```
//!
//! Saves are buffered until [`TagAwarePool::commit`], which bins items by
//! TTL, persists each bin in one bulk call, and retries opaque bulk
//! failures entry by entry. Reads drain the buffer first, so a writer
//! always observes its own writes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tagpool::{PoolConfig, TagAwarePool};
//!
//! # async fn demo() -> tagpool::CacheResult<()> {
//! let mut pool = TagAwarePool::from_config(&PoolConfig::default()).await?;
//!
//! let mut item = pool.get_item("greeting").await?;
//! if !item.is_hit() {
//!     item.set(serde_json::json!("hello"));
//!     item.tag(["greetings", "en"])?;
//!     pool.save(item).await?;
//! }
//!
//! // Later: evict everything tagged "greetings" at once.
//! pool.invalidate_tags(&["greetings"]).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod constants;
pub mod errors;
pub mod item;
mod keys;
pub mod marshal;
pub mod pool;

pub use backend::{BackendProvider, FilesystemBackend, TagBackend, TagData};
pub use config::{FilesystemConfig, PoolConfig, RedisConfig};
pub use errors::{CacheError, CacheResult};
pub use item::CacheItem;
pub use marshal::{JsonMarshaller, Marshaller, StoredRecord};
pub use pool::TagAwarePool;

#[cfg(feature = "backend-redis")]
pub use backend::RedisBackend;
