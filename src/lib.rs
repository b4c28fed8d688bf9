pub mod config;
pub mod error;
pub mod events;
pub mod key;
pub mod provider;
pub mod storage;

pub use error::{ProviderError, ProviderResult, StoreFault};

// Re-export main types for easier access
pub use config::Settings;
pub use events::{ChannelEvents, ClientEvents, LogEvents, ProviderEvent, ProviderInfo};
pub use key::{resolve_key, Scope, GLOBAL_SCOPE, SCOPE_SEPARATOR};
pub use provider::DataProvider;
pub use storage::{MemoryStore, RedisOptions, RedisStore, SledOptions, SledStore, StoreClient};
