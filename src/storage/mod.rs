pub mod memory_store;
pub mod redis_store;
pub mod sled_store;

pub use memory_store::MemoryStore;
pub use redis_store::{RedisOptions, RedisStore};
pub use sled_store::{SledOptions, SledStore};

use crate::error::{ProviderResult, StoreFault};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of the fault channel each backend keeps for its subscribers.
pub const FAULT_CHANNEL_CAPACITY: usize = 16;

/// Connection to a key-value backend.
///
/// Values are opaque serialized text; namespacing and (de)serialization are
/// the data provider's job.
#[async_trait]
pub trait StoreClient: Send + Sync + Sized + 'static {
    /// Connection parameters handed over untouched at construction.
    type Options: Send + Sync;

    /// Open a connection.
    async fn open(options: &Self::Options) -> ProviderResult<Self>;

    /// Close the connection once queued operations have been applied.
    async fn close(&self) -> ProviderResult<()>;

    /// Subscribe to faults the connection raises outside of any operation.
    fn faults(&self) -> broadcast::Receiver<StoreFault>;

    /// Short name of the backend, used in logs and provider info.
    fn backend(&self) -> &'static str;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> ProviderResult<bool>;

    /// Retrieve the raw value of a key
    async fn get(&self, key: &str) -> ProviderResult<Option<String>>;

    /// Store a raw value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> ProviderResult<()>;

    /// Atomically read and remove a key
    async fn get_and_remove(&self, key: &str) -> ProviderResult<Option<String>>;

    /// List all keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> ProviderResult<Vec<String>>;

    /// Remove all the given keys in one operation
    async fn remove_many(&self, keys: &[String]) -> ProviderResult<()>;
}
