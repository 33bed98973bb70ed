//! Pool configuration.
//!
//! Mirrors the shape of the public constructors: a backend discriminator plus
//! one optional section per driver. Unknown backend names fail construction
//! rather than degrading silently.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Namespace prefix partitioning this pool's id-space from others
    /// sharing the same storage. Empty by default.
    #[serde(default)]
    pub namespace: String,

    /// Lifetime applied to items saved without an explicit expiry, in
    /// seconds. `0` means no expiry (the Redis driver still clamps to its
    /// TTL floor).
    #[serde(default)]
    pub default_lifetime_seconds: u64,

    /// Storage driver: `"filesystem"` or `"redis"`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Filesystem driver configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemConfig>,

    /// Redis driver configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

fn default_backend() -> String {
    "filesystem".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            default_lifetime_seconds: 0,
            backend: default_backend(),
            filesystem: None,
            redis: None,
        }
    }
}

/// Filesystem driver configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FilesystemConfig {
    /// Cache root directory. Defaults to a `tagpool` directory under the
    /// system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

/// Redis driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u32,

    /// Response timeout in seconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u32,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_connection_timeout() -> u32 {
    5
}

fn default_response_timeout() -> u32 {
    10
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connection_timeout_seconds: default_connection_timeout(),
            response_timeout_seconds: default_response_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.backend, "filesystem");
        assert_eq!(config.namespace, "");
        assert_eq!(config.default_lifetime_seconds, 0);
        assert!(config.filesystem.is_none());
        assert!(config.redis.is_none());
    }

    #[test]
    fn deserializes_with_partial_sections() {
        let config: PoolConfig = serde_json::from_str(
            r#"{
                "namespace": "app",
                "backend": "redis",
                "redis": { "url": "redis://cache.internal:6379" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "app");
        assert_eq!(config.backend, "redis");
        let redis = config.redis.unwrap();
        assert_eq!(redis.url, "redis://cache.internal:6379");
        assert_eq!(redis.connection_timeout_seconds, 5);
    }

    #[test]
    fn empty_document_is_valid() {
        let config: PoolConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PoolConfig::default());
    }
}
