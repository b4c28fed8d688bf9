//! The sled backend, on its own and behind a data provider.

use guild_store::{
    DataProvider, LogEvents, ProviderError, Scope, SledOptions, SledStore, StoreClient,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn options(dir: &TempDir) -> SledOptions {
    let mut options = SledOptions::new(dir.path().join("db"));
    options.flush_interval = Duration::from_millis(20);
    options
}

#[tokio::test]
async fn raw_operations() {
    let dir = TempDir::new().unwrap();
    let store = SledStore::open(&options(&dir)).await.unwrap();

    assert!(!store.exists("1:a").await.unwrap());
    store.set("1:a", "\"one\"").await.unwrap();
    assert!(store.exists("1:a").await.unwrap());
    assert_eq!(store.get("1:a").await.unwrap().as_deref(), Some("\"one\""));

    assert_eq!(
        store.get_and_remove("1:a").await.unwrap().as_deref(),
        Some("\"one\"")
    );
    assert_eq!(store.get_and_remove("1:a").await.unwrap(), None);
    assert_eq!(store.get("1:a").await.unwrap(), None);

    store.close().await.unwrap();
}

#[tokio::test]
async fn prefix_listing_and_bulk_removal() {
    let dir = TempDir::new().unwrap();
    let store = SledStore::open(&options(&dir)).await.unwrap();

    for key in ["1:a", "1:b", "12:a", "global:a"] {
        store.set(key, "0").await.unwrap();
    }

    let mut keys = store.keys_with_prefix("1:").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["1:a".to_string(), "1:b".to_string()]);

    store.remove_many(&keys).await.unwrap();
    assert!(store.keys_with_prefix("1:").await.unwrap().is_empty());
    assert!(store.exists("12:a").await.unwrap());
    assert!(store.exists("global:a").await.unwrap());

    store.close().await.unwrap();
}

#[tokio::test]
async fn zero_flush_interval_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut options = options(&dir);
    options.flush_interval = Duration::ZERO;

    let err = SledStore::open(&options).await.err().unwrap();
    assert!(matches!(err, ProviderError::Configuration(_)));
}

#[tokio::test]
async fn data_survives_a_provider_restart() {
    let dir = TempDir::new().unwrap();
    let guild = Scope::guild("987654321");

    {
        let provider: DataProvider<SledStore> =
            DataProvider::new(Arc::new(LogEvents), options(&dir));
        provider.init().await.unwrap();
        provider
            .set(guild, "queue", &json!({ "songs": ["a", "b"], "loop": false }))
            .await
            .unwrap();
        provider.set_global("owner", "42").await.unwrap();
        provider.destroy().await.unwrap();
    }

    let provider: DataProvider<SledStore> = DataProvider::new(Arc::new(LogEvents), options(&dir));
    provider.init().await.unwrap();

    assert_eq!(
        provider.get_value(guild, "queue").await.unwrap(),
        Some(json!({ "songs": ["a", "b"], "loop": false }))
    );

    provider.clear(guild).await.unwrap();
    assert_eq!(provider.get_value(guild, "queue").await.unwrap(), None);
    assert_eq!(
        provider.get_global::<String>("owner").await.unwrap().as_deref(),
        Some("42")
    );

    provider.destroy().await.unwrap();
}
