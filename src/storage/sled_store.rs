use crate::error::{ProviderError, ProviderResult, StoreFault};
use crate::storage::{StoreClient, FAULT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Connection parameters for [`SledStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SledOptions {
    pub path: PathBuf,
    pub cache_capacity: u64,
    pub flush_interval: Duration,
}

impl SledOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_capacity: 64 * 1024 * 1024,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Persistent storage using Sled database
///
/// Writes are flushed before they are acknowledged. A background task also
/// flushes every `flush_interval` and reports failures on the fault channel,
/// since those happen outside of any caller's operation.
pub struct SledStore {
    db: Db,
    faults: broadcast::Sender<StoreFault>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl SledStore {
    fn spawn_flusher(
        db: Db,
        faults: broadcast::Sender<StoreFault>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = db.flush_async().await {
                    log::error!("Background flush failed: {}", e);
                    // Nobody listening is fine, the fault is already logged.
                    let _ = faults.send(StoreFault(format!("Failed to flush database: {}", e)));
                }
            }
        })
    }

    fn flush_failed(&self, key: &str, e: ProviderError) {
        log::error!("Flush after removing '{}' failed: {}", key, e);
        let _ = self
            .faults
            .send(StoreFault(format!("Removal of '{}' may not be durable: {}", key, e)));
    }

    async fn flush(&self) -> ProviderResult<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| ProviderError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

fn into_text(key: &str, bytes: IVec) -> ProviderResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        ProviderError::Storage(format!("Value for key '{}' is not valid UTF-8: {}", key, e))
    })
}

#[async_trait]
impl StoreClient for SledStore {
    type Options = SledOptions;

    async fn open(options: &SledOptions) -> ProviderResult<Self> {
        if options.flush_interval.is_zero() {
            return Err(ProviderError::Configuration(
                "Flush interval must be greater than zero".to_string(),
            ));
        }

        let db = sled::Config::new()
            .path(&options.path)
            .cache_capacity(options.cache_capacity)
            .flush_every_ms(None)
            .open()
            .map_err(|e| {
                ProviderError::Storage(format!(
                    "Failed to open Sled database at {:?}: {}",
                    options.path, e
                ))
            })?;

        let (faults, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);
        let flusher = Self::spawn_flusher(db.clone(), faults.clone(), options.flush_interval);

        log::debug!("Opened Sled database at {:?}", options.path);

        Ok(Self {
            db,
            faults,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    async fn close(&self) -> ProviderResult<()> {
        let flusher = self
            .flusher
            .lock()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock flusher: {}", e)))?
            .take();

        if let Some(flusher) = flusher {
            flusher.abort();
            // Wait for the task to drop its handle on the database.
            let _ = flusher.await;
        }

        self.flush().await
    }

    fn faults(&self) -> broadcast::Receiver<StoreFault> {
        self.faults.subscribe()
    }

    fn backend(&self) -> &'static str {
        "sled"
    }

    async fn exists(&self, key: &str) -> ProviderResult<bool> {
        self.db.contains_key(key.as_bytes()).map_err(|e| {
            ProviderError::Storage(format!("Failed to check if key '{}' exists: {}", key, e))
        })
    }

    async fn get(&self, key: &str) -> ProviderResult<Option<String>> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(into_text(key, bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ProviderError::Storage(format!(
                "Failed to get value for key '{}': {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> ProviderResult<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| {
                ProviderError::Storage(format!("Failed to store value for key '{}': {}", key, e))
            })?;

        self.flush().await
    }

    async fn get_and_remove(&self, key: &str) -> ProviderResult<Option<String>> {
        let removed = self.db.remove(key.as_bytes()).map_err(|e| {
            ProviderError::Storage(format!("Failed to delete key '{}': {}", key, e))
        })?;

        let value = removed.map(|bytes| into_text(key, bytes)).transpose()?;

        // Already removed, so a failed flush is reported instead of returned.
        if let Err(e) = self.flush().await {
            self.flush_failed(key, e);
        }

        Ok(value)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> ProviderResult<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            match item {
                Ok((key_bytes, _)) => match std::str::from_utf8(&key_bytes) {
                    Ok(key_str) => keys.push(key_str.to_string()),
                    Err(_) => log::warn!("Skipping non UTF-8 key under prefix '{}'", prefix),
                },
                Err(e) => {
                    return Err(ProviderError::Storage(format!(
                        "Failed to scan keys with prefix '{}': {}",
                        prefix, e
                    )))
                }
            }
        }

        Ok(keys)
    }

    async fn remove_many(&self, keys: &[String]) -> ProviderResult<()> {
        let mut batch = sled::Batch::default();
        for key in keys {
            batch.remove(key.as_bytes());
        }

        self.db
            .apply_batch(batch)
            .map_err(|e| ProviderError::Storage(format!("Failed to delete {} keys: {}", keys.len(), e)))?;

        self.flush().await
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if let Ok(mut flusher) = self.flusher.lock() {
            if let Some(flusher) = flusher.take() {
                flusher.abort();
            }
        }
    }
}
