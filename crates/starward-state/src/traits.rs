use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// Key/value and field-map access to the shared store.
///
/// The gateway reads route and credential data through this trait and writes
/// only its own readiness marker; field maps are authored by the external
/// control plane, which is why `hset_all` exists alongside the read path.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    /// Refreshes the TTL of `key` without touching its value.
    ///
    /// Returns `false` when the key no longer exists (TTL already lapsed).
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Reads a field map. `None` when the key is absent or the map is empty.
    async fn hget_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError>;

    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;
}
