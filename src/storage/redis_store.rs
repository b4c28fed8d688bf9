use crate::error::{ProviderError, ProviderResult, StoreFault};
use crate::storage::{StoreClient, FAULT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Keys fetched per `SCAN` round trip when listing a prefix.
const SCAN_BATCH: usize = 500;

/// Connection parameters for [`RedisStore`].
///
/// `url` goes to the redis client untouched: `redis://`, `rediss://` (needs the
/// `tls` feature) and `redis+unix://` are all accepted, with credentials and
/// database number in the URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisOptions {
    pub url: String,
    pub health_check_interval: Duration,
}

impl RedisOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

/// Redis backend over a reconnecting [`ConnectionManager`].
///
/// Connection errors never surface on their own in a multiplexed connection,
/// so a background task pings the server every `health_check_interval` and
/// publishes failures on the fault channel. Operations that fail because the
/// connection dropped publish a fault as well, besides returning the error.
pub struct RedisStore {
    connection: Mutex<Option<ConnectionManager>>,
    faults: broadcast::Sender<StoreFault>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RedisStore {
    fn spawn_monitor(
        mut connection: ConnectionManager,
        faults: broadcast::Sender<StoreFault>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let pong: RedisResult<String> =
                    redis::cmd("PING").query_async(&mut connection).await;
                if let Err(e) = pong {
                    log::error!("Redis health check failed: {}", e);
                    let _ = faults.send(StoreFault(format!("Redis connection error: {}", e)));
                }
            }
        })
    }

    fn connection(&self) -> ProviderResult<ConnectionManager> {
        self.connection
            .lock()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock connection: {}", e)))?
            .clone()
            .ok_or_else(|| ProviderError::Storage("Redis connection is closed".to_string()))
    }

    /// Map a command error, publishing it as a fault when the connection is at fault.
    fn command_error(&self, action: &str, e: RedisError) -> ProviderError {
        if is_connection_error(&e) {
            let _ = self
                .faults
                .send(StoreFault(format!("Redis connection error: {}", e)));
        }
        ProviderError::Storage(format!("Failed to {}: {}", action, e))
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Escape glob metacharacters so `prefix` only matches itself in `SCAN MATCH`.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl StoreClient for RedisStore {
    type Options = RedisOptions;

    async fn open(options: &RedisOptions) -> ProviderResult<Self> {
        if options.health_check_interval.is_zero() {
            return Err(ProviderError::Configuration(
                "Health check interval must be greater than zero".to_string(),
            ));
        }

        let client = redis::Client::open(options.url.as_str()).map_err(|e| {
            ProviderError::Configuration(format!("Invalid Redis URL '{}': {}", options.url, e))
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| ProviderError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        let (faults, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);
        let monitor = Self::spawn_monitor(
            connection.clone(),
            faults.clone(),
            options.health_check_interval,
        );

        log::debug!("Connected to Redis");

        Ok(Self {
            connection: Mutex::new(Some(connection)),
            faults,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    async fn close(&self) -> ProviderResult<()> {
        let monitor = self
            .monitor
            .lock()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock monitor: {}", e)))?
            .take();

        if let Some(monitor) = monitor {
            monitor.abort();
            let _ = monitor.await;
        }

        // Callers await every command, so nothing is queued once the last
        // handle goes away.
        self.connection
            .lock()
            .map_err(|e| ProviderError::Storage(format!("Failed to lock connection: {}", e)))?
            .take();

        Ok(())
    }

    fn faults(&self) -> broadcast::Receiver<StoreFault> {
        self.faults.subscribe()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn exists(&self, key: &str) -> ProviderResult<bool> {
        let mut con = self.connection()?;
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| self.command_error(&format!("check if key '{}' exists", key), e))
    }

    async fn get(&self, key: &str) -> ProviderResult<Option<String>> {
        let mut con = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| self.command_error(&format!("get value for key '{}'", key), e))
    }

    async fn set(&self, key: &str, value: &str) -> ProviderResult<()> {
        let mut con = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut con)
            .await
            .map_err(|e| self.command_error(&format!("store value for key '{}'", key), e))
    }

    async fn get_and_remove(&self, key: &str) -> ProviderResult<Option<String>> {
        let mut con = self.connection()?;
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| self.command_error(&format!("delete key '{}'", key), e))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> ProviderResult<Vec<String>> {
        let mut con = self.connection()?;
        let pattern = match_pattern(prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await
                .map_err(|e| {
                    self.command_error(&format!("scan keys with prefix '{}'", prefix), e)
                })?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn remove_many(&self, keys: &[String]) -> ProviderResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut con = self.connection()?;
        let mut del = redis::cmd("DEL");
        for key in keys {
            del.arg(key);
        }

        del.query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| self.command_error(&format!("delete {} keys", keys.len()), e))
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        if let Ok(mut monitor) = self.monitor.lock() {
            if let Some(monitor) = monitor.take() {
                monitor.abort();
            }
        }
    }
}
