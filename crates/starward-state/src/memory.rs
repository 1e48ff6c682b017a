use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::KvError;
use crate::traits::KvBackend;

#[derive(Debug, Clone)]
struct KvEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// In-memory store backend with lazy TTL expiry. Used by tests and dev mode.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<HashMap<String, KvEntry>>>,
    hashes: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) => {
                if entry.is_expired(Instant::now()) {
                    drop(data);
                    let mut data = self.data.write().await;
                    data.remove(key);
                    return Ok(None);
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|d| Instant::now() + d);
        data.insert(
            key.to_string(),
            KvEntry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        let now = Instant::now();

        match data.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            Some(_) => {
                data.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        let hashes = self.hashes.read().await;
        Ok(hashes.get(key).filter(|m| !m.is_empty()).cloned())
    }

    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), KvError> {
        let mut hashes = self.hashes.write().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut data = self.data.write().await;
        let mut hashes = self.hashes.write().await;
        let removed = data.remove(key).is_some();
        Ok(hashes.remove(key).is_some() || removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_put_roundtrip() {
        let kv = MemoryKv::new();

        assert!(kv.get("missing").await.unwrap().is_none());

        kv.put("key", b"value", None).await.unwrap();
        assert_eq!(kv.get("key").await.unwrap(), Some(b"value".to_vec()));

        assert!(kv.delete("key").await.unwrap());
        assert!(kv.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let kv = MemoryKv::new();

        kv.put("key", b"value", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(kv.get("key").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expire_refreshes_live_key() {
        let kv = MemoryKv::new();

        kv.put("key", b"value", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(kv.expire("key", Duration::from_secs(60)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(kv.get("key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expire_on_lapsed_key_returns_false() {
        let kv = MemoryKv::new();

        kv.put("key", b"value", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!kv.expire("key", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.expire("never-set", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn hash_roundtrip() {
        let kv = MemoryKv::new();

        assert!(kv.hget_all("route").await.unwrap().is_none());

        let mut fields = HashMap::new();
        fields.insert("method".to_string(), "GET".to_string());
        fields.insert("maintenance".to_string(), "true".to_string());
        kv.hset_all("route", &fields).await.unwrap();

        let read = kv.hget_all("route").await.unwrap().unwrap();
        assert_eq!(read.get("method").map(String::as_str), Some("GET"));
        assert_eq!(read.len(), 2);
    }
}
