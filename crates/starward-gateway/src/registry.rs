//! Instance health registry.
//!
//! Each worker process keeps a time-bounded readiness marker in the shared
//! store under `instances:{hostname}`. Fleet tooling watches the same key;
//! a worker that stops renewing disappears after the TTL, which is the
//! crash signal for external observers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use starward_state::{KvBackend, KvError};

/// Sentinel value gating request handling.
pub const READY: &str = "ready";

/// Writes and renews this instance's readiness marker.
pub struct InstanceRegistry {
    kv: Arc<dyn KvBackend>,
    hostname: String,
    initial_status: String,
    ttl: Duration,
}

impl InstanceRegistry {
    pub fn new(
        kv: Arc<dyn KvBackend>,
        hostname: impl Into<String>,
        initial_status: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            kv,
            hostname: hostname.into(),
            initial_status: initial_status.into(),
            ttl,
        }
    }

    fn key(&self) -> String {
        format!("instances:{}", self.hostname)
    }

    /// Writes the marker once at startup with the configured initial value.
    pub async fn register_initial(&self) -> Result<(), KvError> {
        self.kv
            .put(
                &self.key(),
                self.initial_status.as_bytes(),
                Some(self.ttl),
            )
            .await
    }

    /// Refreshes the marker TTL without changing its value.
    ///
    /// If the key already lapsed (a tick was missed long enough for the TTL
    /// to run out), the marker is re-registered with the initial status so
    /// the worker can come back instead of renewing a key that is gone.
    pub async fn renew(&self) -> Result<(), KvError> {
        let refreshed = self.kv.expire(&self.key(), self.ttl).await?;
        if !refreshed {
            warn!(host = %self.hostname, "Readiness marker lapsed, re-registering");
            self.register_initial().await?;
        }
        Ok(())
    }

    /// True iff the stored marker equals [`READY`].
    pub async fn is_ready(&self) -> Result<bool, KvError> {
        let value = self.kv.get(&self.key()).await?;
        Ok(value.as_deref() == Some(READY.as_bytes()))
    }

    /// Spawns the renewal timer.
    ///
    /// Renewal failures are logged and not retried in-band; the next tick
    /// simply tries again. `interval` must be strictly shorter than the TTL
    /// (enforced by configuration validation).
    pub fn spawn_renewal(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would renew right after registration.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.renew().await {
                            Ok(()) => debug!(host = %registry.hostname, "Readiness marker renewed"),
                            Err(e) => warn!(host = %registry.hostname, error = %e, "Readiness renewal failed"),
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("hostname", &self.hostname)
            .field("initial_status", &self.initial_status)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starward_state::MemoryKv;

    fn registry(kv: Arc<dyn KvBackend>, status: &str, ttl: Duration) -> Arc<InstanceRegistry> {
        Arc::new(InstanceRegistry::new(kv, "worker-1", status, ttl))
    }

    #[tokio::test]
    async fn register_then_ready() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let registry = registry(kv.clone(), "ready", Duration::from_secs(60));

        assert!(!registry.is_ready().await.unwrap());

        registry.register_initial().await.unwrap();
        assert!(registry.is_ready().await.unwrap());

        assert_eq!(
            kv.get("instances:worker-1").await.unwrap(),
            Some(b"ready".to_vec())
        );
    }

    #[tokio::test]
    async fn non_ready_status_gates_traffic() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let registry = registry(kv, "maintenance", Duration::from_secs(60));

        registry.register_initial().await.unwrap();
        assert!(!registry.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn renew_extends_ttl() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let registry = registry(kv, "ready", Duration::from_millis(50));

        registry.register_initial().await.unwrap();

        // Keep renewing across what would otherwise be two expiries.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            registry.renew().await.unwrap();
        }
        assert!(registry.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn renew_reregisters_lapsed_marker() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let registry = registry(kv, "ready", Duration::from_millis(10));

        registry.register_initial().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!registry.is_ready().await.unwrap());

        registry.renew().await.unwrap();
        assert!(registry.is_ready().await.unwrap());
    }
}
