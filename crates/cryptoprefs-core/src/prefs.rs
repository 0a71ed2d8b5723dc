use std::{collections::BTreeMap, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, instrument};

use crate::{
    bundle::PrefsBundle,
    codec::{Preference, Scalar},
    error::PrefsError,
    queue::PendingWrites,
    store::PrefsStore,
};

/// Typed preference API over an encrypted [`PrefsStore`].
///
/// Writes through [`put`](Self::put) hit the store immediately. Writes through
/// [`queue`](Self::queue) stay in memory until [`apply`](Self::apply) commits them as one
/// batch. Reads always go to the store, so queued values are invisible until applied.
///
/// The queue belongs to this instance. Concurrent `put` and `apply` calls touching the
/// same key resolve by completion order; callers needing more must serialize themselves.
pub struct CryptoPrefs<S: PrefsStore> {
    store: Arc<S>,
    queue: Arc<Mutex<PendingWrites>>,
}

impl<S: PrefsStore> CryptoPrefs<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Build a facade over a store that other owners also hold.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            queue: Arc::new(Mutex::new(PendingWrites::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store `value` under `key` right away, overwriting any previous value.
    pub async fn put(&self, key: &str, value: impl Into<Scalar>) -> Result<(), PrefsError> {
        self.put_scalar(key, &value.into()).await
    }

    #[instrument(skip(self, value), fields(kind = %value.kind()))]
    pub async fn put_scalar(&self, key: &str, value: &Scalar) -> Result<(), PrefsError> {
        self.store.put(key, &value.encode()).await?;
        Ok(())
    }

    /// Read `key` as the type of `default`.
    ///
    /// A missing key is created with `default` and `default` is returned. A present
    /// key whose text does not parse as `T` fails with [`PrefsError::Codec`].
    #[instrument(skip(self, default), fields(kind = %T::KIND))]
    pub async fn get<T: Preference>(&self, key: &str, default: T) -> Result<T, PrefsError> {
        match self.store.get(key).await? {
            Some(text) => T::decode(&text).map_err(|source| PrefsError::Codec {
                key: key.to_string(),
                source,
            }),
            None => {
                debug!("key absent; persisting default");
                self.store.put(key, &default.encode()).await?;
                Ok(default)
            }
        }
    }

    /// Runtime-typed twin of [`get`](Self::get); the result has the kind of `default`.
    #[instrument(skip(self, default), fields(kind = %default.kind()))]
    pub async fn get_scalar(&self, key: &str, default: Scalar) -> Result<Scalar, PrefsError> {
        match self.store.get(key).await? {
            Some(text) => {
                Scalar::decode(&text, default.kind()).map_err(|source| PrefsError::Codec {
                    key: key.to_string(),
                    source,
                })
            }
            None => {
                debug!("key absent; persisting default");
                self.store.put(key, &default.encode()).await?;
                Ok(default)
            }
        }
    }

    /// Buffer a write without touching the store.
    pub async fn queue(&self, key: &str, value: impl Into<Scalar>) {
        self.queue_scalar(key, &value.into()).await
    }

    pub async fn queue_scalar(&self, key: &str, value: &Scalar) {
        self.queue.lock().await.enqueue(key, value.encode());
    }

    /// Number of writes waiting for [`apply`](Self::apply).
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Commit every queued write in one atomic batch.
    ///
    /// On failure nothing from the batch is visible and the queue is kept for a retry.
    pub async fn apply(&self) -> Result<(), PrefsError> {
        let mut queue = self.queue.lock().await;
        queue.flush(self.store.as_ref()).await?;
        Ok(())
    }

    /// Remove `key`; absent keys are fine.
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.store.remove(key).await?;
        Ok(())
    }

    /// Delete every entry in the store. Irreversible.
    #[instrument(skip(self))]
    pub async fn erase(&self) -> Result<(), PrefsError> {
        self.store.erase().await?;
        Ok(())
    }

    /// Snapshot of every entry as an opaque bundle.
    pub async fn all_prefs_bundle(&self) -> Result<PrefsBundle, PrefsError> {
        Ok(PrefsBundle::from_entries(self.store.entries().await?))
    }

    /// Snapshot of every entry as a key-ordered map.
    pub async fn all_prefs_map(&self) -> Result<BTreeMap<String, String>, PrefsError> {
        Ok(self.all_prefs_bundle().await?.into_map())
    }

    /// Snapshot of every entry as key-ordered pairs.
    pub async fn all_prefs_list(&self) -> Result<Vec<(String, String)>, PrefsError> {
        Ok(self.store.entries().await?)
    }
}

impl<S: PrefsStore + 'static> CryptoPrefs<S> {
    /// Run [`apply`](Self::apply) on the tokio runtime without blocking the caller.
    ///
    /// Queued values become readable when the returned handle resolves with `Ok`.
    /// Writes queued while the task waits for the queue lock are part of its batch.
    pub fn apply_in_background(&self) -> ApplyHandle {
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let task = tokio::spawn(async move {
            let mut queue = queue.lock().await;
            queue.flush(store.as_ref()).await.map_err(PrefsError::from)
        });
        ApplyHandle { task }
    }
}

/// Completion signal of a background apply.
#[derive(Debug)]
pub struct ApplyHandle {
    task: JoinHandle<Result<(), PrefsError>>,
}

impl ApplyHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the batch to land; join failures become [`PrefsError::Background`].
    pub async fn wait(self) -> Result<(), PrefsError> {
        self.task.await.map_err(|err| PrefsError::Background {
            reason: err.to_string(),
        })?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        codec::{CodecError, ScalarKind},
        store::{InMemoryPrefsStore, StoreError},
    };

    fn prefs() -> CryptoPrefs<InMemoryPrefsStore> {
        CryptoPrefs::new(InMemoryPrefsStore::new())
    }

    /// In-memory store whose writes can be switched off.
    #[derive(Default)]
    struct FailingStore {
        inner: InMemoryPrefsStore,
        fail_writes: AtomicBool,
    }

    impl FailingStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Storage {
                    reason: "permission denied".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PrefsStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put(key, value).await
        }

        async fn put_all(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put_all(entries).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.remove(key).await
        }

        async fn erase(&self) -> Result<(), StoreError> {
            self.check()?;
            self.inner.erase().await
        }

        async fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
            self.inner.entries().await
        }
    }

    /// In-memory store whose batches wait for a permit before landing.
    struct GatedStore {
        inner: InMemoryPrefsStore,
        gate: Semaphore,
    }

    impl GatedStore {
        fn closed() -> Self {
            Self {
                inner: InMemoryPrefsStore::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl PrefsStore for GatedStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.put(key, value).await
        }

        async fn put_all(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
            let _permit = self.gate.acquire().await.map_err(|e| StoreError::Storage {
                reason: e.to_string(),
            })?;
            self.inner.put_all(entries).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }

        async fn erase(&self) -> Result<(), StoreError> {
            self.inner.erase().await
        }

        async fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
            self.inner.entries().await
        }
    }

    #[tokio::test]
    async fn get_on_missing_key_persists_default() {
        let prefs = prefs();
        assert_eq!(prefs.get("missing", 42).await.expect("get"), 42);
        assert_eq!(prefs.get("missing", 0).await.expect("get"), 42);
        assert_eq!(
            prefs.store().get("missing").await.expect("raw get").as_deref(),
            Some("42")
        );
    }

    #[tokio::test]
    async fn text_read_as_integer_is_a_coercion_error() {
        let prefs = prefs();
        prefs.put("k", "text").await.expect("put");

        let err = prefs.get("k", 0).await.expect_err("should not coerce");
        assert!(matches!(
            err,
            PrefsError::Codec {
                ref key,
                source: CodecError::TypeCoercion { kind: ScalarKind::I32, .. },
            } if key == "k"
        ));
        // The stored value is left untouched.
        assert_eq!(prefs.get("k", String::new()).await.expect("get"), "text");
    }

    #[tokio::test]
    async fn put_overwrites_and_reads_back_each_kind() {
        let prefs = prefs();
        prefs.put("flag", false).await.expect("put");
        prefs.put("flag", true).await.expect("put");
        prefs.put("byte", -128i8).await.expect("put");
        prefs.put("short", 512i16).await.expect("put");
        prefs.put("long", i64::MAX).await.expect("put");
        prefs.put("ratio", 0.25f32).await.expect("put");
        prefs.put("pi", std::f64::consts::PI).await.expect("put");
        prefs.put("name", String::from("samwise")).await.expect("put");

        assert!(prefs.get("flag", false).await.expect("get"));
        assert_eq!(prefs.get("byte", 0i8).await.expect("get"), -128);
        assert_eq!(prefs.get("short", 0i16).await.expect("get"), 512);
        assert_eq!(prefs.get("long", 0i64).await.expect("get"), i64::MAX);
        assert_eq!(prefs.get("ratio", 0f32).await.expect("get"), 0.25);
        assert_eq!(
            prefs.get("pi", 0f64).await.expect("get"),
            std::f64::consts::PI
        );
        assert_eq!(
            prefs.get("name", String::new()).await.expect("get"),
            "samwise"
        );
    }

    #[tokio::test]
    async fn queued_writes_are_invisible_until_applied() {
        let prefs = prefs();
        prefs.queue("a", 5).await;

        assert_eq!(prefs.pending().await, 1);
        assert!(prefs.all_prefs_list().await.expect("list").is_empty());
        // Reading writes the default back, which the later apply overwrites.
        assert_eq!(prefs.get("a", 0).await.expect("get"), 0);

        prefs.apply().await.expect("apply");
        assert_eq!(prefs.get("a", 0).await.expect("get"), 5);
        assert_eq!(prefs.pending().await, 0);
    }

    #[tokio::test]
    async fn last_queued_value_wins() {
        let prefs = prefs();
        prefs.queue("a", 1).await;
        prefs.queue("a", 2).await;
        assert_eq!(prefs.pending().await, 2);

        prefs.apply().await.expect("apply");
        assert_eq!(prefs.get("a", 0).await.expect("get"), 2);
    }

    #[tokio::test]
    async fn failed_apply_keeps_queue_and_store_unchanged() {
        let prefs = CryptoPrefs::new(FailingStore::default());
        prefs.put("a", 1).await.expect("put");
        prefs.queue("a", 10).await;
        prefs.queue("b", 20).await;

        prefs.store().fail_writes.store(true, Ordering::SeqCst);
        let err = prefs.apply().await.expect_err("apply should fail");
        assert!(matches!(err, PrefsError::Store(StoreError::Storage { .. })));
        assert_eq!(prefs.pending().await, 2);
        assert_eq!(
            prefs.all_prefs_list().await.expect("list"),
            vec![("a".to_string(), "1".to_string())]
        );

        prefs.store().fail_writes.store(false, Ordering::SeqCst);
        prefs.apply().await.expect("retry");
        assert_eq!(prefs.get("a", 0).await.expect("get"), 10);
        assert_eq!(prefs.get("b", 0).await.expect("get"), 20);
    }

    #[tokio::test]
    async fn store_failures_propagate_from_every_write_path() {
        let prefs = CryptoPrefs::new(FailingStore::default());
        prefs.store().fail_writes.store(true, Ordering::SeqCst);

        assert!(matches!(prefs.put("k", 1).await, Err(PrefsError::Store(_))));
        assert!(matches!(prefs.remove("k").await, Err(PrefsError::Store(_))));
        assert!(matches!(prefs.erase().await, Err(PrefsError::Store(_))));
        // Write-on-miss surfaces the failure instead of returning the default.
        assert!(matches!(prefs.get("k", 1).await, Err(PrefsError::Store(_))));
    }

    #[tokio::test]
    async fn erase_clears_everything() {
        let prefs = prefs();
        prefs.put("x", 1).await.expect("put");
        prefs.put("y", 2).await.expect("put");

        prefs.erase().await.expect("erase");

        assert!(prefs.all_prefs_map().await.expect("map").is_empty());
        assert!(prefs.all_prefs_bundle().await.expect("bundle").is_empty());
        assert_eq!(prefs.get("x", 0).await.expect("get"), 0);
        assert_eq!(prefs.get("y", 0).await.expect("get"), 0);
    }

    #[tokio::test]
    async fn removing_an_absent_key_is_a_no_op() {
        let prefs = prefs();
        prefs.remove("never-existed").await.expect("remove");

        prefs.put("k", "v").await.expect("put");
        prefs.remove("k").await.expect("remove");
        assert_eq!(prefs.store().get("k").await.expect("raw get"), None);
    }

    #[tokio::test]
    async fn bulk_reads_are_snapshots() {
        let prefs = prefs();
        prefs.put("b", true).await.expect("put");
        prefs.put("a", 1.5f64).await.expect("put");

        let map = prefs.all_prefs_map().await.expect("map");
        let list = prefs.all_prefs_list().await.expect("list");
        let bundle = prefs.all_prefs_bundle().await.expect("bundle");
        prefs.put("c", "later").await.expect("put");

        assert_eq!(
            list,
            vec![
                ("a".to_string(), "1.5".to_string()),
                ("b".to_string(), "true".to_string()),
            ]
        );
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b").map(String::as_str), Some("true"));
        assert_eq!(bundle.get::<f64>("a"), Some(Ok(1.5)));
        assert!(!bundle.contains_key("c"));
    }

    #[tokio::test]
    async fn scalar_api_keeps_the_default_kind() {
        let prefs = prefs();
        let first = prefs
            .get_scalar("volume", Scalar::I16(7))
            .await
            .expect("get");
        assert_eq!(first, Scalar::I16(7));

        prefs.queue_scalar("volume", &Scalar::I16(9)).await;
        prefs.apply().await.expect("apply");
        let read = prefs
            .get_scalar("volume", Scalar::I16(0))
            .await
            .expect("get");
        assert_eq!(read, Scalar::I16(9));

        let as_float = prefs
            .get_scalar("volume", Scalar::F64(0.0))
            .await
            .expect("integers read as floats");
        assert_eq!(as_float, Scalar::F64(9.0));

        let err = prefs
            .get_scalar("volume", Scalar::Bool(false))
            .await
            .expect_err("9 is not a bool");
        assert!(matches!(
            err.codec(),
            Some(CodecError::TypeCoercion { kind: ScalarKind::Bool, .. })
        ));
    }

    #[tokio::test]
    async fn background_apply_publishes_on_completion() {
        let prefs = prefs();
        prefs.queue("theme", "dark").await;
        prefs.queue("size", 14).await;

        prefs
            .apply_in_background()
            .wait()
            .await
            .expect("background apply");

        assert_eq!(prefs.pending().await, 0);
        assert_eq!(
            prefs.get("theme", String::new()).await.expect("get"),
            "dark"
        );
        assert_eq!(prefs.get("size", 0).await.expect("get"), 14);
    }

    #[tokio::test]
    async fn background_apply_is_invisible_until_it_completes() {
        let prefs = CryptoPrefs::new(GatedStore::closed());
        prefs.queue("theme", "dark").await;

        let handle = prefs.apply_in_background();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!handle.is_finished());
        assert_eq!(prefs.store().get("theme").await.expect("raw get"), None);
        assert!(prefs.all_prefs_list().await.expect("list").is_empty());

        prefs.store().gate.add_permits(1);
        handle.wait().await.expect("background apply");

        assert_eq!(
            prefs.store().get("theme").await.expect("raw get").as_deref(),
            Some("dark")
        );
        assert_eq!(prefs.pending().await, 0);
    }

    #[tokio::test]
    async fn shared_store_sees_applied_writes_from_another_facade() {
        let store = Arc::new(InMemoryPrefsStore::new());
        let writer = CryptoPrefs::from_shared(Arc::clone(&store));
        let reader = CryptoPrefs::from_shared(store);

        writer.queue("shared", 3i64).await;
        assert_eq!(reader.pending().await, 0);
        writer.apply().await.expect("apply");

        assert_eq!(reader.get("shared", 0i64).await.expect("get"), 3);
    }
}
