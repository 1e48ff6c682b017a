//! Gateway assembly and worker serve loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use starward_state::KvBackend;

use crate::collab::{
    BackendExecutor, EchoExecutor, GovernorRateLimit, RateLimitCheck, RestrictedCheck,
    SourceAllowList,
};
use crate::config::{GatewayConfig, StoreConfig};
use crate::error::GatewayError;
use crate::pipeline::{Pipeline, RequestContext};
use crate::registry::InstanceRegistry;
use crate::responses::ResponseCatalog;
use crate::supervisor::Supervisor;

/// The pipeline's external collaborators.
pub struct Collaborators {
    pub rate_limit: Arc<dyn RateLimitCheck>,
    pub restricted: Arc<dyn RestrictedCheck>,
    pub executor: Arc<dyn BackendExecutor>,
}

impl Collaborators {
    /// Bundled defaults: governor-backed rate limiting, source allow-list
    /// restriction, echo executor.
    pub fn bundled(config: &GatewayConfig) -> Self {
        Self {
            rate_limit: Arc::new(GovernorRateLimit::new(&config.rate_limit)),
            restricted: Arc::new(SourceAllowList::new()),
            executor: Arc::new(EchoExecutor::new()),
        }
    }
}

/// Builds the store backend named by the configuration.
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn KvBackend>, GatewayError> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory store (workers will not share state)");
            Ok(Arc::new(starward_state::MemoryKv::new()))
        }
        StoreConfig::Valkey {
            url,
            namespace,
            pool_size,
        } => {
            let kv = starward_state::ValkeyKv::new(url, namespace.clone(), *pool_size)
                .await
                .map_err(|e| GatewayError::Config(format!("Store connection failed: {e}")))?;
            info!(url = %url, "Connected to Valkey");
            Ok(Arc::new(kv))
        }
    }
}

/// Assembles the registry and the request pipeline.
pub fn build_pipeline(
    config: &GatewayConfig,
    kv: Arc<dyn KvBackend>,
    hostname: &str,
    collaborators: Collaborators,
) -> (Arc<InstanceRegistry>, Arc<Pipeline>) {
    let registry = Arc::new(InstanceRegistry::new(
        kv.clone(),
        hostname,
        config.instance.initial_status.clone(),
        config.instance.ttl,
    ));

    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        kv,
        config.health_probe.clone(),
        collaborators.rate_limit,
        collaborators.restricted,
        collaborators.executor,
        ResponseCatalog::new(&config.messages),
    ));

    (registry, pipeline)
}

/// Builds the catch-all router. The gateway has no fixed route table: every
/// request goes through the admission pipeline.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().fallback(handle_any).with_state(pipeline)
}

async fn handle_any(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let ctx = RequestContext::new(&parts.method, &parts.uri, parts.headers);
    pipeline.handle(ctx).await
}

/// Serves one worker's listener until cancelled.
pub async fn run_worker(
    listener: tokio::net::TcpListener,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let app = router(pipeline);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(GatewayError::Io)?;

    Ok(())
}

/// Runs the whole gateway: store connection, health registration and
/// renewal, and the supervised worker fleet.
pub async fn run(config: GatewayConfig, cancel: CancellationToken) -> Result<(), GatewayError> {
    config
        .validate()
        .map_err(|e| GatewayError::Config(e.to_string()))?;

    let kv = connect_store(&config.store).await?;

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned());

    let collaborators = Collaborators::bundled(&config);
    let (registry, pipeline) = build_pipeline(&config, kv, &host, collaborators);

    registry.register_initial().await?;
    info!(
        host = %host,
        initial_status = %config.instance.initial_status,
        ttl_secs = config.instance.ttl.as_secs(),
        "Instance registered"
    );

    let renewal = registry.spawn_renewal(config.instance.renew_interval, cancel.clone());

    let addr = SocketAddr::new(config.server.bind_addr, config.server.port);
    let supervisor = Supervisor::new(
        addr,
        config.server.workers,
        config.supervisor.clone(),
        pipeline,
        cancel,
    );

    let result = supervisor.run().await;

    renewal.abort();
    info!("Gateway shutdown complete");
    result
}
