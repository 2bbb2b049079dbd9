use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Optional best-effort key-value collaborator (e.g. Redis in a full
/// deployment). Every call site must tolerate the store being absent
/// entirely and degrade to in-memory-only behavior, so the API is
/// infallible: failures inside an implementation are swallowed or logged.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Option<serde_json::Value>> + Send;

    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> impl Future<Output = ()> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = ()> + Send;
}

/// In-memory TTL store, the default stand-in when no external store is
/// configured.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (serde_json::Value, Option<Instant>)>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value, deadline));
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}
