//! Filesystem driver: records as sharded files, tag relations as symlinks.
//!
//! Layout under the pool root (one root per namespace):
//!
//! ```text
//! <root>/<a>/<b>/<hash_tail>            one file per item
//! <root>/tags/<escaped_tag_id>/<link>   one symlink per (tag, item)
//! ```
//!
//! `a`/`b` are the first two hex characters of an xxh3 hash of the item id;
//! the file body is `<expires_at>\n<escaped_id>\n<payload>`. A `0` header
//! means the file itself enforces no expiry. Each tag symlink targets the
//! absolute path of the item file, so invalidation can unlink items without
//! knowing their ids.
//!
//! Invalidation renames the tag directory to a random sibling before sweeping
//! it. Writers racing with the sweep land their fresh symlinks in a new
//! directory under the original name and survive, which is the intended
//! snapshot semantics.

use crate::constants::TAG_LINK_NAME_LEN;
use crate::errors::{CacheError, CacheResult};
use crate::keys;
use crate::marshal::{Marshaller, StoredRecord};
use chrono::Utc;
use percent_encoding::{percent_decode, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use super::{TagBackend, TagData};

/// Escaping applied to ids in file headers and to tag directory names.
/// Everything outside `[A-Za-z0-9_.~-]` is percent-escaped, so the result is
/// a single path component with no newline.
const ID_ESCAPE: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Directory name for the tag subtree.
const TAG_SUBDIR: &str = "tags";

/// Filesystem-backed tag-aware driver.
pub struct FilesystemBackend {
    root: PathBuf,
    tag_root: PathBuf,
    marshaller: Arc<dyn Marshaller>,
}

impl std::fmt::Debug for FilesystemBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemBackend")
            .field("root", &self.root)
            .finish()
    }
}

impl FilesystemBackend {
    /// Open (and create if needed) the cache root for the given namespace.
    ///
    /// `directory` defaults to `tagpool` under the system temp dir. Each
    /// namespace gets its own subtree, so clearing one pool cannot touch a
    /// neighbouring pool's files.
    pub async fn new(
        directory: Option<&Path>,
        namespace: &str,
        marshaller: Arc<dyn Marshaller>,
    ) -> CacheResult<Self> {
        keys::normalize_namespace(namespace)?;

        let base = directory
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::temp_dir().join("tagpool"));
        let ns_dir = if namespace.is_empty() {
            "@".to_string()
        } else {
            escape(namespace)
        };
        let root = base.join(ns_dir);

        fs::create_dir_all(&root).await.map_err(|e| {
            CacheError::InvalidConfiguration(format!(
                "cannot create cache directory {}: {e}",
                root.display()
            ))
        })?;
        // Symlink targets must be absolute so links resolve regardless of
        // the sweeping process's working directory.
        let root = fs::canonicalize(&root).await.map_err(|e| {
            CacheError::InvalidConfiguration(format!(
                "cannot resolve cache directory {}: {e}",
                root.display()
            ))
        })?;
        let tag_root = root.join(TAG_SUBDIR);
        fs::create_dir_all(&tag_root).await.map_err(|e| {
            CacheError::InvalidConfiguration(format!(
                "cannot create tag directory {}: {e}",
                tag_root.display()
            ))
        })?;

        debug!(root = %root.display(), "filesystem cache backend ready");

        Ok(Self {
            root,
            tag_root,
            marshaller,
        })
    }

    /// Shard directory and file path for an item id.
    fn locate(&self, id: &str) -> (PathBuf, PathBuf) {
        let hash = format!("{:032x}", xxh3_128(id.as_bytes()));
        let dir = self.root.join(&hash[0..1]).join(&hash[1..2]);
        let file = dir.join(&hash[2..]);
        (dir, file)
    }

    /// Symlink file name for an item id inside a tag directory.
    fn link_name(id: &str) -> String {
        let hash = format!("{:032x}", xxh3_128(id.as_bytes()));
        hash[..TAG_LINK_NAME_LEN].to_string()
    }

    fn tag_dir(&self, tag_id: &str) -> PathBuf {
        self.tag_root.join(escape(tag_id))
    }

    async fn write_item_file(
        &self,
        id: &str,
        expires_at: i64,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let (dir, file) = self.locate(id);
        fs::create_dir_all(&dir).await?;

        let escaped_id = escape(id);
        let mut contents =
            Vec::with_capacity(24 + escaped_id.len() + payload.len());
        contents.extend_from_slice(expires_at.to_string().as_bytes());
        contents.push(b'\n');
        contents.extend_from_slice(escaped_id.as_bytes());
        contents.push(b'\n');
        contents.extend_from_slice(payload);

        // Write-then-rename so racing writers to the same id never produce a
        // torn file.
        let tmp = dir.join(format!(".{}", Uuid::new_v4().simple()));
        fs::write(&tmp, &contents).await?;
        match fs::rename(&tmp, &file).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    /// Parse an item file, enforcing the freshness and id-match checks.
    /// Unlinks the file and returns `None` when it is expired or corrupt.
    async fn read_item_file(&self, id: &str, file: &Path) -> Option<StoredRecord> {
        let data = match fs::read(file).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(id = %id, error = %e, "failed to read cache file");
                return None;
            }
        };

        let Some((expires_at, stored_id, payload)) = split_item_file(&data) else {
            warn!(id = %id, file = %file.display(), "unparseable cache file header, removing");
            let _ = fs::remove_file(file).await;
            return None;
        };

        if expires_at != 0 && expires_at <= Utc::now().timestamp() {
            let _ = fs::remove_file(file).await;
            return None;
        }

        if stored_id != id {
            // Hash collision or foreign file under our shard path.
            warn!(
                id = %id,
                stored_id = %stored_id,
                "cache file id mismatch, removing"
            );
            let _ = fs::remove_file(file).await;
            return None;
        }

        match self.marshaller.decode(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(id = %id, error = %e, "failed to unmarshal cache file, removing");
                let _ = fs::remove_file(file).await;
                None
            }
        }
    }

    async fn root_writable(&self) -> bool {
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4().simple()));
        match fs::write(&probe, b"").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                true
            }
            Err(_) => false,
        }
    }

    /// Walk the shard tree and unlink item files whose expiry has passed.
    /// Returns the number of files removed. Tag relations pointing at pruned
    /// files dangle until the next sweep, which readers tolerate.
    pub async fn prune(&self) -> CacheResult<u64> {
        let now = Utc::now().timestamp();
        let mut pruned = 0u64;

        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            let name = shard.file_name();
            if name == TAG_SUBDIR || name.to_string_lossy().starts_with('.') {
                continue;
            }
            if !shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut subshards = fs::read_dir(shard.path()).await?;
            while let Some(subshard) = subshards.next_entry().await? {
                let mut files = match fs::read_dir(subshard.path()).await {
                    Ok(files) => files,
                    Err(_) => continue,
                };
                while let Some(file) = files.next_entry().await? {
                    let path = file.path();
                    let Ok(data) = fs::read(&path).await else {
                        continue;
                    };
                    match split_item_file(&data) {
                        Some((expires_at, _, _)) if expires_at != 0 && expires_at <= now => {
                            if fs::remove_file(&path).await.is_ok() {
                                pruned += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(pruned = pruned, "pruned expired cache files");
        Ok(pruned)
    }
}

impl TagBackend for FilesystemBackend {
    async fn do_fetch(&self, ids: &[String]) -> CacheResult<Vec<(String, StoredRecord)>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let (_, file) = self.locate(id);
            if let Some(record) = self.read_item_file(id, &file).await {
                found.push((id.clone(), record));
            }
        }
        Ok(found)
    }

    async fn do_have(&self, id: &str) -> CacheResult<bool> {
        let (_, file) = self.locate(id);
        let data = match fs::read(&file).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let Some((expires_at, stored_id, _)) = split_item_file(&data) else {
            let _ = fs::remove_file(&file).await;
            return Ok(false);
        };
        if expires_at != 0 && expires_at <= Utc::now().timestamp() {
            let _ = fs::remove_file(&file).await;
            return Ok(false);
        }
        Ok(stored_id == id)
    }

    async fn do_save(
        &self,
        records: &HashMap<String, StoredRecord>,
        ttl: u64,
        add_tag_data: &TagData,
        remove_tag_data: &TagData,
    ) -> CacheResult<Vec<String>> {
        let (encoded, mut failed) = self.marshaller.encode(records);
        if encoded.is_empty() && !records.is_empty() {
            return Ok(failed);
        }

        let expires_at = if ttl == 0 {
            0
        } else {
            Utc::now().timestamp() + ttl as i64
        };

        for (id, payload) in &encoded {
            if let Err(e) = self.write_item_file(id, expires_at, payload).await {
                warn!(id = %id, error = %e, "failed to write cache file");
                failed.push(id.clone());
            }
        }

        if !failed.is_empty() && !self.root_writable().await {
            return Err(CacheError::InvalidConfiguration(format!(
                "cache directory {} is not writable",
                self.root.display()
            )));
        }

        // Item files are on disk; only now do the tag relations appear.
        for (tag_id, ids) in add_tag_data {
            let dir = self.tag_dir(tag_id);
            if let Err(e) = fs::create_dir_all(&dir).await {
                warn!(tag = %tag_id, error = %e, "failed to create tag directory");
                let unlinked: Vec<String> = ids
                    .iter()
                    .filter(|id| !failed.contains(*id))
                    .cloned()
                    .collect();
                failed.extend(unlinked);
                continue;
            }
            for id in ids {
                if failed.contains(id) {
                    continue;
                }
                let (_, target) = self.locate(id);
                let link = dir.join(Self::link_name(id));
                match fs::symlink(&target, &link).await {
                    Ok(()) => {}
                    // Concurrent writers re-linking the same (tag, item) pair
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => {
                        warn!(id = %id, tag = %tag_id, error = %e, "failed to link tag relation");
                        failed.push(id.clone());
                    }
                }
            }
        }

        for (tag_id, ids) in remove_tag_data {
            let dir = self.tag_dir(tag_id);
            for id in ids {
                match fs::remove_file(dir.join(Self::link_name(id))).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        debug!(id = %id, tag = %tag_id, error = %e, "failed to unlink tag relation")
                    }
                }
            }
        }

        Ok(failed)
    }

    async fn do_delete(&self, ids: &[String]) -> CacheResult<bool> {
        let mut ok = true;
        for id in ids {
            let (_, file) = self.locate(id);
            match fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to delete cache file");
                    ok = false;
                }
            }
        }
        Ok(ok)
    }

    async fn do_delete_tag_relations(&self, tag_data: &TagData) -> CacheResult<bool> {
        for (tag_id, ids) in tag_data {
            let dir = self.tag_dir(tag_id);
            for id in ids {
                match fs::remove_file(dir.join(Self::link_name(id))).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        debug!(id = %id, tag = %tag_id, error = %e, "failed to unlink tag relation")
                    }
                }
            }
        }
        Ok(true)
    }

    async fn do_invalidate(&self, tag_ids: &[String]) -> CacheResult<bool> {
        let mut ok = true;
        for tag_id in tag_ids {
            let dir = self.tag_dir(tag_id);
            // Snapshot-and-clear: writers adding fresh relations keep racing
            // against a new directory under the original name, not the sweep.
            let doomed = self
                .tag_root
                .join(format!(".inv-{}", Uuid::new_v4().simple()));
            match fs::rename(&dir, &doomed).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(tag = %tag_id, error = %e, "failed to detach tag directory");
                    ok = false;
                    continue;
                }
            }

            let mut entries = match fs::read_dir(&doomed).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tag = %tag_id, error = %e, "failed to walk detached tag directory");
                    ok = false;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(tag = %tag_id, error = %e, "failed to walk detached tag directory");
                        ok = false;
                        break;
                    }
                };
                let link = entry.path();
                match fs::read_link(&link).await {
                    Ok(target) => match fs::remove_file(&target).await {
                        Ok(()) => {}
                        // The item expired or was deleted individually after
                        // the relation was recorded.
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(target = %target.display(), error = %e, "failed to delete tagged item");
                            ok = false;
                        }
                    },
                    Err(e) => {
                        debug!(link = %link.display(), error = %e, "skipping non-symlink tag entry")
                    }
                }
                let _ = fs::remove_file(&link).await;
            }

            if let Err(e) = fs::remove_dir(&doomed).await {
                debug!(dir = %doomed.display(), error = %e, "failed to remove swept tag directory");
            }
        }
        Ok(ok)
    }

    async fn do_clear(&self) -> CacheResult<bool> {
        let mut ok = true;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let result = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to clear cache entry");
                    ok = false;
                }
            }
        }
        fs::create_dir_all(&self.tag_root).await?;
        Ok(ok)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(self.root_writable().await)
    }

    fn provider_name(&self) -> &'static str {
        "filesystem"
    }
}

fn escape(value: &str) -> String {
    utf8_percent_encode(value, &ID_ESCAPE).to_string()
}

/// Split `<expires_at>\n<escaped_id>\n<payload>` into its parts. Returns
/// `None` when the header does not parse.
fn split_item_file(data: &[u8]) -> Option<(i64, String, &[u8])> {
    let header_end = data.iter().position(|&b| b == b'\n')?;
    let expires_at: i64 = std::str::from_utf8(&data[..header_end]).ok()?.parse().ok()?;

    let rest = &data[header_end + 1..];
    let id_end = rest.iter().position(|&b| b == b'\n')?;
    let stored_id = percent_decode(&rest[..id_end])
        .decode_utf8()
        .ok()?
        .into_owned();

    Some((expires_at, stored_id, &rest[id_end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::JsonMarshaller;
    use serde_json::json;

    async fn backend(dir: &Path) -> FilesystemBackend {
        FilesystemBackend::new(Some(dir), "test", Arc::new(JsonMarshaller))
            .await
            .unwrap()
    }

    fn record(value: serde_json::Value, tags: &[&str]) -> StoredRecord {
        StoredRecord {
            value,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn records(entries: &[(&str, serde_json::Value)]) -> HashMap<String, StoredRecord> {
        entries
            .iter()
            .map(|(id, value)| (id.to_string(), record(value.clone(), &[])))
            .collect()
    }

    fn tag_data(entries: &[(&str, &[&str])]) -> TagData {
        entries
            .iter()
            .map(|(tag, ids)| {
                (
                    tag.to_string(),
                    ids.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn save_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        let failed = backend
            .do_save(
                &records(&[("id-1", json!({"n": 1})), ("id-2", json!("two"))]),
                0,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();
        assert!(failed.is_empty());

        let found = backend
            .do_fetch(&["id-1".to_string(), "id-2".to_string(), "absent".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        let by_id: HashMap<_, _> = found.into_iter().collect();
        assert_eq!(by_id["id-1"].value, json!({"n": 1}));
        assert_eq!(by_id["id-2"].value, json!("two"));
    }

    #[tokio::test]
    async fn files_land_in_two_level_shards() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("sharded", json!(1))]),
                0,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();

        let (shard_dir, file) = backend.locate("sharded");
        assert!(file.exists());
        assert_eq!(shard_dir.parent().unwrap().parent().unwrap(), backend.root);
        let tail = file.file_name().unwrap().to_string_lossy();
        assert!(tail.len() >= 20, "hash tail too short: {tail}");
    }

    #[tokio::test]
    async fn expired_file_is_dropped_and_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("ephemeral", json!(1))]),
                1,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();

        // Rewrite the header with an expiry in the past.
        let (_, file) = backend.locate("ephemeral");
        let data = std::fs::read(&file).unwrap();
        let body = data.splitn(2, |&b| b == b'\n').nth(1).unwrap().to_vec();
        let mut forged = b"1\n".to_vec();
        forged.extend_from_slice(&body);
        std::fs::write(&file, forged).unwrap();

        let found = backend.do_fetch(&["ephemeral".to_string()]).await.unwrap();
        assert!(found.is_empty());
        assert!(!file.exists(), "expired file should have been unlinked");
    }

    #[tokio::test]
    async fn mismatched_inner_id_reports_miss_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("victim", json!(1))]),
                0,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();

        let (_, file) = backend.locate("victim");
        let payload = serde_json::to_vec(&record(json!(1), &[])).unwrap();
        let mut forged = b"0\nsomebody-else\n".to_vec();
        forged.extend_from_slice(&payload);
        std::fs::write(&file, forged).unwrap();

        let found = backend.do_fetch(&["victim".to_string()]).await.unwrap();
        assert!(found.is_empty());
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn corrupt_payload_reports_miss_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("garbled", json!(1))]),
                0,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();

        let (_, file) = backend.locate("garbled");
        std::fs::write(&file, b"0\ngarbled\n\x00\x01not json").unwrap();

        let found = backend.do_fetch(&["garbled".to_string()]).await.unwrap();
        assert!(found.is_empty());
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn invalidate_removes_tagged_items_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("tagged-1", json!(1)), ("tagged-2", json!(2)), ("plain", json!(3))]),
                0,
                &tag_data(&[("tag:x", &["tagged-1", "tagged-2"])]),
                &TagData::new(),
            )
            .await
            .unwrap();

        assert!(backend
            .do_invalidate(&["tag:x".to_string()])
            .await
            .unwrap());

        let survivors = backend
            .do_fetch(&[
                "tagged-1".to_string(),
                "tagged-2".to_string(),
                "plain".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].0, "plain");

        // The swept tag directory is gone.
        assert!(!backend.tag_dir("tag:x").exists());
    }

    #[tokio::test]
    async fn invalidate_unknown_tag_is_a_successful_noop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        assert!(backend
            .do_invalidate(&["tag:never-used".to_string()])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn invalidate_tolerates_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("doomed", json!(1))]),
                0,
                &tag_data(&[("tag:x", &["doomed"])]),
                &TagData::new(),
            )
            .await
            .unwrap();

        // Delete the item behind the relation's back.
        assert!(backend.do_delete(&["doomed".to_string()]).await.unwrap());

        assert!(backend
            .do_invalidate(&["tag:x".to_string()])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn remove_tag_data_unlinks_relations() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("movable", json!(1))]),
                0,
                &tag_data(&[("tag:old", &["movable"])]),
                &TagData::new(),
            )
            .await
            .unwrap();

        backend
            .do_save(
                &records(&[("movable", json!(1))]),
                0,
                &tag_data(&[("tag:new", &["movable"])]),
                &tag_data(&[("tag:old", &["movable"])]),
            )
            .await
            .unwrap();

        // Invalidating the old tag no longer reaches the item.
        backend.do_invalidate(&["tag:old".to_string()]).await.unwrap();
        assert_eq!(backend.do_fetch(&["movable".to_string()]).await.unwrap().len(), 1);

        backend.do_invalidate(&["tag:new".to_string()]).await.unwrap();
        assert!(backend.do_fetch(&["movable".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn do_have_checks_freshness_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        assert!(!backend.do_have("missing").await.unwrap());

        backend
            .do_save(
                &records(&[("present", json!(1))]),
                0,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();
        assert!(backend.do_have("present").await.unwrap());
    }

    #[tokio::test]
    async fn delete_tolerates_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        assert!(backend
            .do_delete(&["never-stored".to_string()])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn clear_wipes_items_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("a", json!(1)), ("b", json!(2))]),
                0,
                &tag_data(&[("tag:x", &["a"])]),
                &TagData::new(),
            )
            .await
            .unwrap();

        assert!(backend.do_clear().await.unwrap());
        assert!(backend
            .do_fetch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap()
            .is_empty());
        // The backend is still usable after a clear.
        backend
            .do_save(
                &records(&[("c", json!(3))]),
                0,
                &tag_data(&[("tag:y", &["c"])]),
                &TagData::new(),
            )
            .await
            .unwrap();
        assert!(backend.do_have("c").await.unwrap());
    }

    #[tokio::test]
    async fn prune_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;

        backend
            .do_save(
                &records(&[("stale", json!(1))]),
                1,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();
        backend
            .do_save(
                &records(&[("fresh", json!(2))]),
                3_600,
                &TagData::new(),
                &TagData::new(),
            )
            .await
            .unwrap();

        // Backdate the stale entry.
        let (_, file) = backend.locate("stale");
        let data = std::fs::read(&file).unwrap();
        let body = data.splitn(2, |&b| b == b'\n').nth(1).unwrap().to_vec();
        let mut forged = b"1\n".to_vec();
        forged.extend_from_slice(&body);
        std::fs::write(&file, forged).unwrap();

        assert_eq!(backend.prune().await.unwrap(), 1);
        assert!(!backend.do_have("stale").await.unwrap());
        assert!(backend.do_have("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn namespaces_get_disjoint_roots() {
        let dir = tempfile::tempdir().unwrap();
        let marshaller: Arc<dyn Marshaller> = Arc::new(JsonMarshaller);
        let one = FilesystemBackend::new(Some(dir.path()), "one", Arc::clone(&marshaller))
            .await
            .unwrap();
        let two = FilesystemBackend::new(Some(dir.path()), "two", marshaller)
            .await
            .unwrap();

        one.do_save(
            &records(&[("shared-key", json!(1))]),
            0,
            &TagData::new(),
            &TagData::new(),
        )
        .await
        .unwrap();

        assert!(one.do_have("shared-key").await.unwrap());
        assert!(!two.do_have("shared-key").await.unwrap());

        two.do_clear().await.unwrap();
        assert!(one.do_have("shared-key").await.unwrap());
    }

    #[tokio::test]
    async fn health_check_reports_writable_root() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path()).await;
        assert!(backend.health_check().await.unwrap());
    }

    #[test]
    fn split_item_file_rejects_bad_headers() {
        assert!(split_item_file(b"").is_none());
        assert!(split_item_file(b"no-newline").is_none());
        assert!(split_item_file(b"not-a-number\nid\n").is_none());
        assert!(split_item_file(b"0\nid-without-payload-newline").is_none());

        let (expires, id, payload) = split_item_file(b"0\nmy%3Aid\npayload").unwrap();
        assert_eq!(expires, 0);
        assert_eq!(id, "my:id");
        assert_eq!(payload, b"payload");
    }
}
