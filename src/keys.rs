//! Key and tag validation plus namespaced id derivation.
//!
//! Every identifier the pool hands to a storage driver is derived here. Item
//! ids are `<namespace>:<key>`; tag ids are `<namespace>:\0tags\0<tag>`. The
//! NUL infix cannot survive validation, so the two id families are disjoint,
//! and `:` is a reserved character, so distinct `(namespace, key)` pairs can
//! never produce the same id.

use crate::constants::{MAX_NAMESPACE_LEN, RESERVED_CHARS, TAGS_INFIX};
use crate::errors::{CacheError, CacheResult};

fn find_forbidden(value: &str) -> Option<char> {
    value
        .chars()
        .find(|c| c.is_control() || RESERVED_CHARS.contains(*c))
}

/// Validate a user-visible cache key.
pub(crate) fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput(
            "cache key must not be empty".to_string(),
        ));
    }
    if let Some(c) = find_forbidden(key) {
        return Err(CacheError::InvalidInput(format!(
            "cache key {key:?} contains reserved character {c:?}"
        )));
    }
    Ok(())
}

/// Validate a tag name. Same charset rules as keys.
pub(crate) fn validate_tag(tag: &str) -> CacheResult<()> {
    if tag.is_empty() {
        return Err(CacheError::InvalidInput(
            "cache tag must not be empty".to_string(),
        ));
    }
    if let Some(c) = find_forbidden(tag) {
        return Err(CacheError::InvalidInput(format!(
            "cache tag {tag:?} contains reserved character {c:?}"
        )));
    }
    Ok(())
}

/// Validate a namespace and return it suffixed with the id separator.
///
/// An empty namespace is valid and normalizes to the empty prefix.
pub(crate) fn normalize_namespace(namespace: &str) -> CacheResult<String> {
    if namespace.is_empty() {
        return Ok(String::new());
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(CacheError::InvalidInput(format!(
            "namespace exceeds {MAX_NAMESPACE_LEN} characters"
        )));
    }
    if let Some(c) = find_forbidden(namespace) {
        return Err(CacheError::InvalidInput(format!(
            "namespace {namespace:?} contains reserved character {c:?}"
        )));
    }
    Ok(format!("{namespace}:"))
}

/// Backend id for an item, scoped to the normalized namespace prefix.
pub(crate) fn item_id(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

/// Backend id for a tag, scoped to the normalized namespace prefix.
pub(crate) fn tag_id(prefix: &str, tag: &str) -> String {
    format!("{prefix}{TAGS_INFIX}{tag}")
}
