//! Operational constants shared by the pool and its storage drivers.

/// TTL floor applied by the Redis driver when a record has no expiry
/// (100 days, in seconds).
///
/// Records must always expire so that a `volatile-*` eviction policy prefers
/// them over the never-expiring tag sets. A tag set outliving its items only
/// produces tolerable dangling references; an item outliving its tag set
/// becomes undiscoverable by `invalidate_tags`.
pub const DEFAULT_CACHE_TTL: u64 = 8_640_000;

/// Maximum number of ids handed to a single bulk delete during tag
/// invalidation. Larger unions are deleted in chunks of this size.
pub const BULK_DELETE_LIMIT: usize = 10_000;

/// `COUNT` hint for SCAN-based namespace clearing.
pub const SCAN_BATCH_SIZE: usize = 1_000;

/// Characters forbidden in cache keys, tag names, and namespaces.
pub const RESERVED_CHARS: &str = "{}()/\\@:";

/// Infix separating the namespace from a tag name inside a tag id.
///
/// The NUL bytes cannot appear in any validated key or namespace, so a tag id
/// can never collide with an item id.
pub const TAGS_INFIX: &str = "\0tags\0";

/// Maximum accepted namespace length.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Length of a tag symlink file name on the filesystem driver.
pub const TAG_LINK_NAME_LEN: usize = 20;
