//! Valkey/Redis adapter for the KV backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use crate::error::KvError;
use crate::traits::KvBackend;

/// Valkey/Redis KV backend.
#[derive(Clone)]
pub struct ValkeyKv {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyKv {
    /// Create a new Valkey KV backend and verify the connection.
    pub async fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
    ) -> Result<Self, KvError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| KvError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| KvError::Connection(e.to_string()))?;

        // Test the connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;

        Ok(Self { pool, namespace })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, KvError> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl KvBackend for ValkeyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let result: Option<Vec<u8>> = conn
            .get(&prefixed)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(result)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);

        match ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(&prefixed, value, seconds)
                    .await
                    .map_err(|e| KvError::Backend(e.to_string()))?;
            }
            None => {
                conn.set::<_, _, ()>(&prefixed, value)
                    .await
                    .map_err(|e| KvError::Backend(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let seconds = ttl.as_secs().max(1) as i64;

        let refreshed: i64 = conn
            .expire(&prefixed, seconds)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(refreshed == 1)
    }

    async fn hget_all(&self, key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        // HGETALL on a missing key yields an empty map.
        let fields: HashMap<String, String> = conn
            .hgetall(&prefixed)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }

    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        conn.hset_multiple::<_, _, _, ()>(&prefixed, &pairs)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let deleted: i64 = conn
            .del(&prefixed)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok(deleted > 0)
    }
}

impl std::fmt::Debug for ValkeyKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyKv")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
