//! Remote object store.
//!
//! [`ObjectStore`] is a blocking, bucket-bound client. Sync workers each own
//! one through a [`StoreSlot`], created on first use from a shared
//! [`StoreFactory`] and dropped on reset or when the worker is recycled.
//!
//! Implementations:
//!
//! - [`S3Store`]: `aws-sdk-s3`, driven by blocking on a tokio runtime handle
//! - [`MemoryStore`]: in-process state shared by every connection; paged
//!   listing, per-key failure injection and call counters for tests

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::runtime::Handle;

use crate::error::StoreError;
use crate::hash::md5_hex;

/// `Cache-Control` for every object the pipeline writes.
pub const CACHE_CONTROL: &str = "max-age=3600, public";

// ---------------------------------------------------------------------------
// Trait and value types
// ---------------------------------------------------------------------------

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// ETag as returned by the store, possibly quoted.
    pub etag: String,
}

/// One page of a listing; `next` is the continuation token, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next: Option<String>,
}

/// Headers stored with an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

impl ObjectMeta {
    pub const PNG: ObjectMeta = ObjectMeta {
        content_type: "image/png",
        cache_control: CACHE_CONTROL,
    };

    pub const JSON: ObjectMeta = ObjectMeta {
        content_type: "application/json",
        cache_control: CACHE_CONTROL,
    };
}

/// A key a bulk delete did not remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: String,
    pub message: String,
}

/// Blocking client for one bucket.
pub trait ObjectStore {
    fn bucket(&self) -> &str;

    /// List keys under `prefix`, continuing from `continuation` if given.
    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, StoreError>;

    fn put_object(&self, key: &str, body: Vec<u8>, meta: ObjectMeta) -> Result<(), StoreError>;

    fn upload_file(&self, path: &Path, key: &str, meta: ObjectMeta) -> Result<(), StoreError>;

    /// Quiet bulk delete; returns only the keys that were not deleted.
    fn delete_objects(&self, keys: &[String]) -> Result<Vec<KeyFailure>, StoreError>;

    fn delete_object(&self, key: &str) -> Result<(), StoreError>;

    /// Fails if the bucket is missing or not visible with these credentials.
    fn head_bucket(&self) -> Result<(), StoreError>;
}

/// Creates store clients; shared by every sync worker.
pub trait StoreFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError>;
}

/// A sync worker's lazily created client.
pub struct StoreSlot {
    factory: Arc<dyn StoreFactory>,
    client: Option<Box<dyn ObjectStore>>,
}

impl StoreSlot {
    pub fn new(factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            factory,
            client: None,
        }
    }

    /// The current client, connecting first if there is none.
    pub fn get(&mut self) -> Result<&dyn ObjectStore, StoreError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => self.factory.connect()?,
        };
        Ok(&**self.client.insert(client))
    }

    /// Drop the client; the next [`get`](Self::get) reconnects.
    pub fn reset(&mut self) {
        self.client = None;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }
}

/// Head the bucket, then write and delete a `test-<uuid>` object.
pub fn check_bucket(store: &dyn ObjectStore) -> Result<(), StoreError> {
    let unusable = |err: StoreError| StoreError::Unusable {
        bucket: store.bucket().to_string(),
        reason: err.to_string(),
    };
    store.head_bucket().map_err(unusable)?;
    let key = format!("test-{}", uuid::Uuid::new_v4());
    store
        .put_object(&key, b"write test".to_vec(), ObjectMeta::JSON)
        .map_err(unusable)?;
    store.delete_object(&key).map_err(unusable)?;
    tracing::debug!(bucket = store.bucket(), "bucket is writable");
    Ok(())
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

fn remote_err(
    operation: &'static str,
    target: impl Into<String>,
    err: impl std::error::Error,
) -> StoreError {
    StoreError::Remote {
        operation,
        target: target.into(),
        message: DisplayErrorContext(err).to_string(),
    }
}

/// S3 client bound to one bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    runtime: Handle,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>, runtime: Handle) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            runtime,
        }
    }
}

impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, StoreError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation.map(String::from))
                    .send(),
            )
            .map_err(|e| remote_err("list", prefix, e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    size: u64::try_from(object.size().unwrap_or(0)).unwrap_or(0),
                    etag: object.e_tag().unwrap_or_default().to_string(),
                })
            })
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };
        Ok(ListPage { objects, next })
    }

    fn put_object(&self, key: &str, body: Vec<u8>, meta: ObjectMeta) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .content_type(meta.content_type)
                    .cache_control(meta.cache_control)
                    .send(),
            )
            .map_err(|e| remote_err("put", key, e))?;
        Ok(())
    }

    fn upload_file(&self, path: &Path, key: &str, meta: ObjectMeta) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            let body = ByteStream::from_path(path)
                .await
                .map_err(|e| remote_err("read", path.display().to_string(), e))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .content_type(meta.content_type)
                .cache_control(meta.cache_control)
                .send()
                .await
                .map_err(|e| remote_err("upload", key, e))?;
            Ok::<(), StoreError>(())
        })
    }

    fn delete_objects(&self, keys: &[String]) -> Result<Vec<KeyFailure>, StoreError> {
        let target = || format!("{} keys", keys.len());
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| remote_err("delete", target(), e))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| remote_err("delete", target(), e))?;

        let output = self
            .runtime
            .block_on(
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send(),
            )
            .map_err(|e| remote_err("delete", target(), e))?;

        Ok(output
            .errors()
            .iter()
            .map(|error| KeyFailure {
                key: error.key().unwrap_or_default().to_string(),
                message: format!(
                    "{}: {}",
                    error.code().unwrap_or("Unknown"),
                    error.message().unwrap_or_default()
                ),
            })
            .collect())
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|e| remote_err("delete", key, e))?;
        Ok(())
    }

    fn head_bucket(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.client.head_bucket().bucket(&self.bucket).send())
            .map_err(|e| remote_err("head", self.bucket.as_str(), e))?;
        Ok(())
    }
}

/// Builds one [`S3Store`] per worker from the loaded AWS config.
#[derive(Debug, Clone)]
pub struct S3StoreFactory {
    sdk_config: aws_config::SdkConfig,
    bucket: String,
    runtime: Handle,
}

impl S3StoreFactory {
    pub fn new(sdk_config: aws_config::SdkConfig, bucket: impl Into<String>, runtime: Handle) -> Self {
        Self {
            sdk_config,
            bucket: bucket.into(),
            runtime,
        }
    }

    /// Resolve credentials and region from the environment.
    pub fn from_env(bucket: impl Into<String>, runtime: Handle) -> Self {
        let sdk_config = runtime.block_on(aws_config::load_from_env());
        Self::new(sdk_config, bucket, runtime)
    }

    pub fn store(&self) -> S3Store {
        S3Store::new(
            Client::new(&self.sdk_config),
            self.bucket.clone(),
            self.runtime.clone(),
        )
    }
}

impl StoreFactory for S3StoreFactory {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError> {
        Ok(Box::new(self.store()))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub etag: String,
    pub content_type: String,
    pub cache_control: String,
}

/// Request counts seen by a [`MemoryStore`], across all connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connects: usize,
    pub list_pages: usize,
    pub puts: usize,
    pub uploads: usize,
    pub delete_batches: usize,
    pub deletes: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    failing: BTreeSet<String>,
    calls: CallCounts,
}

/// In-process bucket; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: 1000,
            state: Arc::default(),
        }
    }

    /// Keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Seed an object as if uploaded earlier.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        let body = body.into();
        self.lock().objects.insert(
            key.into(),
            StoredObject {
                etag: format!("\"{}\"", md5_hex(&body)),
                body,
                content_type: ObjectMeta::PNG.content_type.to_string(),
                cache_control: CACHE_CONTROL.to_string(),
            },
        );
    }

    /// Every write or delete of `key` fails from now on.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.lock().failing.insert(key.into());
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, key: &str, body: Vec<u8>, meta: ObjectMeta) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing.contains(key) {
            return Err(StoreError::Remote {
                operation: "put",
                target: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                etag: format!("\"{}\"", md5_hex(&body)),
                body,
                content_type: meta.content_type.to_string(),
                cache_control: meta.cache_control.to_string(),
            },
        );
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage, StoreError> {
        let mut state = self.lock();
        state.calls.list_pages += 1;
        let mut listed = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |after| key.as_str() > after));
        let objects: Vec<ObjectInfo> = listed
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.body.len() as u64,
                etag: object.etag.clone(),
            })
            .collect();
        let next = match (listed.next(), objects.last()) {
            (Some(_), Some(last)) => Some(last.key.clone()),
            _ => None,
        };
        Ok(ListPage { objects, next })
    }

    fn put_object(&self, key: &str, body: Vec<u8>, meta: ObjectMeta) -> Result<(), StoreError> {
        self.lock().calls.puts += 1;
        self.write(key, body, meta)
    }

    fn upload_file(&self, path: &Path, key: &str, meta: ObjectMeta) -> Result<(), StoreError> {
        self.lock().calls.uploads += 1;
        let body = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write(key, body, meta)
    }

    fn delete_objects(&self, keys: &[String]) -> Result<Vec<KeyFailure>, StoreError> {
        let mut state = self.lock();
        state.calls.delete_batches += 1;
        let mut failures = Vec::new();
        for key in keys {
            if state.failing.contains(key) {
                failures.push(KeyFailure {
                    key: key.clone(),
                    message: "AccessDenied: injected failure".to_string(),
                });
            } else {
                state.objects.remove(key);
                state.calls.deletes += 1;
            }
        }
        Ok(failures)
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing.contains(key) {
            return Err(StoreError::Remote {
                operation: "delete",
                target: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.objects.remove(key);
        state.calls.deletes += 1;
        Ok(())
    }

    fn head_bucket(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl StoreFactory for MemoryStore {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError> {
        self.lock().calls.connects += 1;
        Ok(Box::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_pages_follow_continuation() {
        let store = MemoryStore::new("bucket").with_page_size(2);
        for key in ["tiles/0/0/0.png", "tiles/1/0/0.png", "tiles/1/1/0.png", "other/x"] {
            store.insert(key, "x");
        }

        let first = store.list_page("tiles/", None).unwrap();
        assert_eq!(first.objects.len(), 2);
        let token = first.next.expect("more pages");

        let second = store.list_page("tiles/", Some(&token)).unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "tiles/1/1/0.png");
        assert_eq!(second.next, None);
    }

    #[test]
    fn etag_is_quoted_md5() {
        let store = MemoryStore::new("bucket");
        store.insert("k", "abc");
        assert_eq!(store.get("k").unwrap().etag, "\"900150983cd24fb0d6963f7d28e17f72\"");
    }

    #[test]
    fn bulk_delete_reports_failed_keys_only() {
        let store = MemoryStore::new("bucket");
        store.insert("a", "1");
        store.insert("b", "2");
        store.fail_on("b");

        let failures = store
            .delete_objects(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "b");
        assert_eq!(store.keys(), vec!["b"]);
    }

    #[test]
    fn slot_connects_lazily_and_reconnects_after_reset() {
        let store = MemoryStore::new("bucket");
        let mut slot = StoreSlot::new(Arc::new(store.clone()));
        assert!(!slot.is_connected());
        assert_eq!(store.calls().connects, 0);

        slot.get().unwrap();
        slot.get().unwrap();
        assert_eq!(store.calls().connects, 1);

        slot.reset();
        assert!(!slot.is_connected());
        slot.get().unwrap();
        assert_eq!(store.calls().connects, 2);
    }

    #[test]
    fn writable_bucket_check_leaves_nothing_behind() {
        let store = MemoryStore::new("bucket");
        check_bucket(&store).unwrap();
        assert!(store.keys().is_empty());
        assert_eq!(store.calls().puts, 1);
        assert_eq!(store.calls().deletes, 1);
    }

    #[test]
    fn upload_sets_png_headers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("0.png");
        std::fs::write(&path, b"png").unwrap();
        let store = MemoryStore::new("bucket");
        store
            .upload_file(&path, "tiles/0/0/0.png", ObjectMeta::PNG)
            .unwrap();
        let object = store.get("tiles/0/0/0.png").unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.cache_control, "max-age=3600, public");
    }
}
