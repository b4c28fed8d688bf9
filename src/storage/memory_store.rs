use crate::error::{ProviderError, ProviderResult, StoreFault};
use crate::storage::{StoreClient, FAULT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// In-memory storage backend.
///
/// Every clone of a `MemoryStore` is a handle to the same data, and the store
/// is also its own connection options: opening a connection with a handle
/// returns another handle to that data. Keeping a handle around lets a caller
/// inspect writes and inject faults while a provider is connected.
///
/// # Example
///
/// ```
/// use guild_store::storage::{MemoryStore, StoreClient};
///
/// # tokio_test_block(async {
/// let backend = MemoryStore::new();
/// let conn = MemoryStore::open(&backend).await.unwrap();
/// conn.set("global:greeting", "\"hi\"").await.unwrap();
/// assert_eq!(backend.raw("global:greeting").as_deref(), Some("\"hi\""));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    data: RwLock<BTreeMap<String, String>>,
    mutations: AtomicUsize,
    closed: AtomicBool,
    faults: broadcast::Sender<StoreFault>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let (faults, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(BTreeMap::new()),
                mutations: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                faults,
            }),
        }
    }

    /// Raise a fault on every open connection, as a dropped socket would.
    /// Returns how many subscribers received it.
    pub fn inject_fault(&self, message: &str) -> usize {
        self.inner
            .faults
            .send(StoreFault(message.to_string()))
            .unwrap_or(0)
    }

    /// Number of write operations applied so far (set, remove, bulk remove).
    pub fn mutation_count(&self) -> usize {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw serialized value under an absolute key.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner
            .data
            .read()
            .ok()
            .and_then(|data| data.get(key).cloned())
    }

    /// Write a raw value directly, bypassing any connection.
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut data) = self.inner.data.write() {
            data.insert(key.to_string(), value.to_string());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn read(&self) -> ProviderResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.inner
            .data
            .read()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock memory store: {}", e)))
    }

    fn write(&self) -> ProviderResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        let data = self
            .inner
            .data
            .write()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock memory store: {}", e)))?;
        self.inner.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    type Options = MemoryStore;

    async fn open(options: &MemoryStore) -> ProviderResult<Self> {
        options.inner.closed.store(false, Ordering::SeqCst);
        Ok(options.clone())
    }

    async fn close(&self) -> ProviderResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn faults(&self) -> broadcast::Receiver<StoreFault> {
        self.inner.faults.subscribe()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &str) -> ProviderResult<bool> {
        Ok(self.read()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> ProviderResult<Option<String>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ProviderResult<()> {
        self.write()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_and_remove(&self, key: &str) -> ProviderResult<Option<String>> {
        Ok(self.write()?.remove(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> ProviderResult<Vec<String>> {
        let data = self.read()?;
        let keys = data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(keys)
    }

    async fn remove_many(&self, keys: &[String]) -> ProviderResult<()> {
        let mut data = self.write()?;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_share_data() {
        let backend = MemoryStore::new();
        let conn = MemoryStore::open(&backend).await.unwrap();

        conn.set("1:a", "1").await.unwrap();
        assert_eq!(backend.raw("1:a").as_deref(), Some("1"));
        assert!(conn.exists("1:a").await.unwrap());
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn prefix_listing_is_exact_prefix() {
        let backend = MemoryStore::new();
        for key in ["1:a", "1:b", "12:a", "global:a", "x1:a"] {
            backend.insert_raw(key, "null");
        }

        let keys = backend.keys_with_prefix("1:").await.unwrap();
        assert_eq!(keys, vec!["1:a".to_string(), "1:b".to_string()]);
    }

    #[tokio::test]
    async fn get_and_remove_returns_prior_value() {
        let backend = MemoryStore::new();
        backend.insert_raw("global:k", "\"v\"");

        assert_eq!(
            backend.get_and_remove("global:k").await.unwrap().as_deref(),
            Some("\"v\"")
        );
        assert_eq!(backend.get_and_remove("global:k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn faults_reach_subscribers() {
        let backend = MemoryStore::new();
        assert_eq!(backend.inject_fault("nobody listening"), 0);

        let mut faults = backend.faults();
        assert_eq!(backend.inject_fault("connection reset"), 1);
        assert_eq!(
            faults.recv().await.unwrap(),
            StoreFault("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn close_marks_the_store() {
        let backend = MemoryStore::new();
        let conn = MemoryStore::open(&backend).await.unwrap();
        conn.close().await.unwrap();
        assert!(backend.is_closed());
    }
}
