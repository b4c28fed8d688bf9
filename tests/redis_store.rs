//! The Redis backend against a live server.
//!
//! These tests need a running Redis and are ignored by default:
//!
//! ```text
//! GUILD_STORE_TEST_REDIS_URL=redis://127.0.0.1/ cargo test --test redis_store -- --ignored
//! ```

use guild_store::{
    ChannelEvents, DataProvider, ProviderEvent, RedisOptions, RedisStore, Scope, StoreClient,
};
use serde_json::json;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

fn options() -> RedisOptions {
    let url = env::var("GUILD_STORE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    RedisOptions::new(url)
}

/// A guild id no other test run uses, so tests can share a database.
fn fresh_guild() -> String {
    Uuid::new_v4().simple().to_string()
}

#[tokio::test]
#[ignore = "needs a running Redis server"]
async fn raw_operations() {
    let store = RedisStore::open(&options()).await.unwrap();
    let key = format!("{}:a", fresh_guild());

    assert!(!store.exists(&key).await.unwrap());
    store.set(&key, "\"one\"").await.unwrap();
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("\"one\""));

    assert_eq!(
        store.get_and_remove(&key).await.unwrap().as_deref(),
        Some("\"one\"")
    );
    assert_eq!(store.get_and_remove(&key).await.unwrap(), None);

    store.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running Redis server"]
async fn prefix_listing_and_bulk_removal() {
    let store = RedisStore::open(&options()).await.unwrap();
    let guild = fresh_guild();
    let sibling = format!("{}0", guild);

    for key in ["a", "b", "c"] {
        store.set(&format!("{}:{}", guild, key), "0").await.unwrap();
    }
    store.set(&format!("{}:a", sibling), "0").await.unwrap();

    let keys = store.keys_with_prefix(&format!("{}:", guild)).await.unwrap();
    assert_eq!(keys.len(), 3);

    store.remove_many(&keys).await.unwrap();
    assert!(store
        .keys_with_prefix(&format!("{}:", guild))
        .await
        .unwrap()
        .is_empty());
    assert!(store.exists(&format!("{}:a", sibling)).await.unwrap());

    store
        .remove_many(&[format!("{}:a", sibling)])
        .await
        .unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running Redis server"]
async fn provider_round_trip() {
    let (sink, mut events) = ChannelEvents::channel();
    let provider: DataProvider<RedisStore> = DataProvider::new(Arc::new(sink), options());
    let guild_id = fresh_guild();
    let guild = Scope::guild(&guild_id);

    provider.init().await.unwrap();
    assert!(matches!(events.try_recv(), Ok(ProviderEvent::Init(info)) if info.backend == "redis"));

    provider.set(guild, "queue", &json!({ "songs": ["a"] })).await.unwrap();
    provider.set(guild, "nothing", &json!(null)).await.unwrap();
    assert_eq!(
        provider.get_value(guild, "queue").await.unwrap(),
        Some(json!({ "songs": ["a"] }))
    );
    assert_eq!(provider.get_value(guild, "nothing").await.unwrap(), Some(json!(null)));
    assert_eq!(provider.get_value(guild, "unknown").await.unwrap(), None);

    assert_eq!(
        provider.delete_value(guild, "queue").await.unwrap(),
        Some(json!({ "songs": ["a"] }))
    );

    provider.clear(guild).await.unwrap();
    assert_eq!(provider.get_value(guild, "nothing").await.unwrap(), None);
    assert_eq!(events.try_recv(), Ok(ProviderEvent::Clear(Some(guild_id.clone()))));

    provider.destroy().await.unwrap();
    assert!(matches!(events.try_recv(), Ok(ProviderEvent::Destroy(_))));
}
