use crate::error::{ProviderError, ProviderResult};
use crate::events::{ClientEvents, ProviderEvent, ProviderInfo};
use crate::key::{resolve_key, Scope};
use crate::storage::StoreClient;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// An open store connection and the task relaying its faults to the host.
struct Connection<S> {
    client: Arc<S>,
    backend: &'static str,
    fault_relay: JoinHandle<()>,
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.fault_relay.abort();
    }
}

/// Scoped key-value data provider.
///
/// Values are stored as JSON under keys namespaced by guild (`<guild id>:<key>`)
/// or by the global scope (`global:<key>`). The provider owns the lifecycle of
/// its store connection: nothing is opened until [`DataProvider::init`] and
/// the connection is released by [`DataProvider::destroy`].
pub struct DataProvider<S: StoreClient> {
    id: Uuid,
    options: S::Options,
    events: Arc<dyn ClientEvents>,
    connection: RwLock<Option<Connection<S>>>,
    // Held across open/close so lifecycle calls never overlap.
    lifecycle: Mutex<()>,
}

impl<S: StoreClient> DataProvider<S> {
    pub fn new(events: Arc<dyn ClientEvents>, options: S::Options) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            events,
            connection: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The payload this provider attaches to lifecycle events.
    pub fn info(&self) -> ProviderInfo {
        let backend = self
            .connection
            .read()
            .ok()
            .and_then(|conn| conn.as_ref().map(|conn| conn.backend))
            .unwrap_or("disconnected");

        ProviderInfo {
            id: self.id,
            backend,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.connection
            .read()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    /// Connect to the store and start relaying its faults to the host's error
    /// event. Emits [`ProviderEvent::Init`] and resolves to the provider itself.
    pub async fn init(&self) -> ProviderResult<&Self> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            log::warn!("Data provider {} is already initialized", self.id);
            return Ok(self);
        }

        let client = S::open(&self.options).await?;
        let backend = client.backend();
        let mut faults = client.faults();
        let events = Arc::clone(&self.events);

        let fault_relay = tokio::spawn(async move {
            loop {
                match faults.recv().await {
                    Ok(fault) => events.emit(ProviderEvent::Error(fault)),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Fault relay lagged behind, {} faults were dropped", missed)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        {
            let mut connection = self.connection.write().map_err(|e| {
                ProviderError::Storage(format!("Failed to lock connection: {}", e))
            })?;
            *connection = Some(Connection {
                client: Arc::new(client),
                backend,
                fault_relay,
            });
        }

        let info = self.info();
        log::info!("Initialized {}", info);
        self.events.emit(ProviderEvent::Init(info));

        Ok(self)
    }

    /// Close the store connection once queued operations are done and emit
    /// [`ProviderEvent::Destroy`]. The provider must not be used afterwards.
    pub async fn destroy(&self) -> ProviderResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let info = self.info();
        let connection = self
            .connection
            .write()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock connection: {}", e)))?
            .take()
            .ok_or(ProviderError::NotInitialized)?;

        let closed = connection.client.close().await;
        drop(connection);
        closed?;

        log::info!("Destroyed {}", info);
        self.events.emit(ProviderEvent::Destroy(info));

        Ok(())
    }

    fn client(&self) -> ProviderResult<Arc<S>> {
        self.connection
            .read()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock connection: {}", e)))?
            .as_ref()
            .map(|conn| Arc::clone(&conn.client))
            .ok_or(ProviderError::NotInitialized)
    }

    async fn fetch(&self, key: &str) -> ProviderResult<Option<Value>> {
        let client = self.client()?;
        if !client.exists(key).await? {
            log::debug!("No value stored under '{}'", key);
            return Ok(None);
        }

        match client.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, value: Option<Value>) -> ProviderResult<()> {
        let value = value.ok_or_else(|| {
            ProviderError::Validation(
                "Stored value cannot be absent, consider using null".to_string(),
            )
        })?;

        let raw = serde_json::to_string(&value)?;
        self.client()?.set(key, &raw).await?;
        log::debug!("Stored value under '{}'", key);

        Ok(())
    }

    async fn take(&self, key: &str) -> ProviderResult<Option<Value>> {
        let client = self.client()?;
        if !client.exists(key).await? {
            return Ok(None);
        }

        match client.get_and_remove(key).await? {
            Some(raw) => {
                log::debug!("Deleted value under '{}'", key);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Get the raw JSON value for a key. `None` means nothing is stored, while
    /// a stored null comes back as `Some(Value::Null)`.
    pub async fn get_value(&self, scope: Scope<'_>, key: &str) -> ProviderResult<Option<Value>> {
        self.fetch(&resolve_key(key, scope)?).await
    }

    /// Get a value for a key in a scope.
    pub async fn get<T: DeserializeOwned>(
        &self,
        scope: Scope<'_>,
        key: &str,
    ) -> ProviderResult<Option<T>> {
        self.get_value(scope, key).await?.map(from_value).transpose()
    }

    /// Get a value for a key in a scope, or `default` if there is no entry.
    pub async fn get_or<T: DeserializeOwned>(
        &self,
        scope: Scope<'_>,
        key: &str,
        default: T,
    ) -> ProviderResult<T> {
        Ok(self.get(scope, key).await?.unwrap_or(default))
    }

    pub async fn get_global<T: DeserializeOwned>(&self, key: &str) -> ProviderResult<Option<T>> {
        self.get(Scope::Global, key).await
    }

    pub async fn get_global_or<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> ProviderResult<T> {
        self.get_or(Scope::Global, key, default).await
    }

    /// Store a raw JSON value. `None` is rejected before reaching the store;
    /// use `Some(Value::Null)` to store null.
    pub async fn set_value(
        &self,
        scope: Scope<'_>,
        key: &str,
        value: Option<Value>,
    ) -> ProviderResult<()> {
        let key = resolve_key(key, scope)?;
        self.store(&key, value).await
    }

    /// Set a value for a key in a scope, replacing any previous value.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        scope: Scope<'_>,
        key: &str,
        value: &T,
    ) -> ProviderResult<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            ProviderError::Validation(format!("Value for '{}' cannot be stored as JSON: {}", key, e))
        })?;
        self.set_value(scope, key, Some(value)).await
    }

    pub async fn set_global<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ProviderResult<()> {
        self.set(Scope::Global, key, value).await
    }

    /// Delete a key and return the raw JSON value it held, if any.
    pub async fn delete_value(&self, scope: Scope<'_>, key: &str) -> ProviderResult<Option<Value>> {
        self.take(&resolve_key(key, scope)?).await
    }

    /// Delete a key-value pair in a scope, resolving the data that was deleted.
    pub async fn delete<T: DeserializeOwned>(
        &self,
        scope: Scope<'_>,
        key: &str,
    ) -> ProviderResult<Option<T>> {
        self.delete_value(scope, key).await?.map(from_value).transpose()
    }

    pub async fn delete_global<T: DeserializeOwned>(&self, key: &str) -> ProviderResult<Option<T>> {
        self.delete(Scope::Global, key).await
    }

    /// Remove every key in a scope and emit [`ProviderEvent::Clear`] with the
    /// guild id, or `None` for the global scope.
    pub async fn clear(&self, scope: Scope<'_>) -> ProviderResult<()> {
        let prefix = scope.prefix()?;
        let client = self.client()?;

        let keys = client.keys_with_prefix(&prefix).await?;
        if !keys.is_empty() {
            client.remove_many(&keys).await?;
        }
        log::debug!("Cleared {} keys in {}", keys.len(), scope);

        self.events
            .emit(ProviderEvent::Clear(scope.id().map(str::to_string)));

        Ok(())
    }

    pub async fn clear_global(&self) -> ProviderResult<()> {
        self.clear(Scope::Global).await
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> ProviderResult<T> {
    Ok(serde_json::from_value(value)?)
}
