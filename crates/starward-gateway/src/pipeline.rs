//! Request admission pipeline.
//!
//! Stages run strictly in order: readiness gate, health probe, vhost
//! resolution, maintenance gate, policy chain, executor hand-off. Each
//! stage either advances the request or terminates it. Terminal rejections
//! travel as typed [`GatewayError`]s and are rendered through the message
//! catalogue in one place; responses that are already authored (probe
//! replies, collaborator denials, executor output) travel as
//! [`Flow::Terminate`].
//!
//! Anything that escapes a stage — including store failures — maps to the
//! store-error 500, so a worker never dies from a single bad request.

use std::sync::Arc;

use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use starward_state::KvBackend;

use crate::collab::{BackendExecutor, RateLimitCheck, RateLimitDecision, RestrictedCheck};
use crate::config::ProbeConfig;
use crate::error::GatewayError;
use crate::registry::InstanceRegistry;
use crate::responses::ResponseCatalog;
use crate::vhost::{AccessPolicy, VhostRecord, VhostResolver};

/// Per-request state. Owned by the handling of one request, never shared.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    /// Value of the Host header, verbatim.
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(method: &Method, uri: &Uri, headers: HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        Self {
            method: method.as_str().to_owned(),
            host,
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            headers,
        }
    }
}

/// Outcome of a pipeline stage holding an already-authored response.
enum Flow<T> {
    Continue(T),
    Terminate(Response),
}

/// The per-request decision pipeline, shared by every worker listener.
pub struct Pipeline {
    registry: Arc<InstanceRegistry>,
    resolver: VhostResolver,
    probe: Option<ProbeConfig>,
    rate_limit: Arc<dyn RateLimitCheck>,
    restricted: Arc<dyn RestrictedCheck>,
    executor: Arc<dyn BackendExecutor>,
    responses: ResponseCatalog,
    kv: Arc<dyn KvBackend>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<InstanceRegistry>,
        kv: Arc<dyn KvBackend>,
        probe: Option<ProbeConfig>,
        rate_limit: Arc<dyn RateLimitCheck>,
        restricted: Arc<dyn RestrictedCheck>,
        executor: Arc<dyn BackendExecutor>,
        responses: ResponseCatalog,
    ) -> Self {
        Self {
            registry,
            resolver: VhostResolver::new(kv.clone()),
            probe,
            rate_limit,
            restricted,
            executor,
            responses,
            kv,
        }
    }

    /// Runs the pipeline and always produces a response.
    pub async fn handle(&self, ctx: RequestContext) -> Response {
        match self.run(ctx).await {
            Ok(response) => response,
            Err(error) => {
                match &error {
                    GatewayError::StoreUnavailable(detail) => {
                        warn!(error = %detail, "Store failure during request handling");
                    }
                    GatewayError::Io(e) => {
                        warn!(error = %e, "IO failure during request handling");
                    }
                    _ => {
                        debug!(outcome = error.error_type(), "Request terminated");
                    }
                }
                self.responses.render(&error)
            }
        }
    }

    async fn run(&self, ctx: RequestContext) -> Result<Response, GatewayError> {
        self.readiness_gate().await?;

        let ctx = match self.health_probe(ctx) {
            Flow::Terminate(response) => return Ok(response),
            Flow::Continue(ctx) => ctx,
        };

        let record = self.resolve_vhost(&ctx).await?;

        if record.maintenance {
            return Err(GatewayError::MaintenanceActive);
        }

        if let Flow::Terminate(response) = self.policy_chain(&ctx, &record).await? {
            return Ok(response);
        }

        self.executor.execute(&ctx, &record).await
    }

    /// A worker mid-startup, mid-shutdown or cut off from the store never
    /// serves traffic.
    async fn readiness_gate(&self) -> Result<(), GatewayError> {
        if self.registry.is_ready().await? {
            Ok(())
        } else {
            Err(GatewayError::NotReady)
        }
    }

    /// Answers operator probes before any vhost data is read.
    fn health_probe(&self, ctx: RequestContext) -> Flow<RequestContext> {
        match &self.probe {
            Some(probe) if probe_matches(probe, &ctx) => {
                Flow::Terminate(self.responses.health_ok())
            }
            _ => Flow::Continue(ctx),
        }
    }

    async fn resolve_vhost(&self, ctx: &RequestContext) -> Result<VhostRecord, GatewayError> {
        self.resolver
            .resolve(&ctx.host, &ctx.path, &ctx.method)
            .await?
            .ok_or(GatewayError::RouteNotFound)
    }

    /// Mutually exclusive access-control evaluation; the mode was fixed at
    /// resolution time, so exactly one arm runs.
    async fn policy_chain(
        &self,
        ctx: &RequestContext,
        record: &VhostRecord,
    ) -> Result<Flow<()>, GatewayError> {
        match &record.policy {
            AccessPolicy::Open => Ok(Flow::Continue(())),
            AccessPolicy::BasicAuth => {
                self.check_basic_auth(ctx).await?;
                Ok(Flow::Continue(()))
            }
            AccessPolicy::RateLimit(_) => match self.rate_limit.check(ctx, record).await? {
                RateLimitDecision::Admitted => Ok(Flow::Continue(())),
                RateLimitDecision::Denied(response) => Ok(Flow::Terminate(response)),
            },
            AccessPolicy::Restricted(spec) => {
                if self.restricted.check(ctx, spec).await {
                    Ok(Flow::Continue(()))
                } else {
                    Err(GatewayError::Unauthorized { realm: None })
                }
            }
        }
    }

    async fn check_basic_auth(&self, ctx: &RequestContext) -> Result<(), GatewayError> {
        let unauthorized = || GatewayError::Unauthorized {
            realm: Some(ctx.host.clone()),
        };

        let (username, password) =
            parse_basic_credentials(&ctx.headers).ok_or_else(unauthorized)?;

        let key = format!("basic:auth:{}:{}", ctx.host, username);
        let stored = self.kv.get(&key).await?;

        // Exact-string comparison against the stored plaintext password; no
        // hashing at this layer and no constant-time guarantee.
        match stored {
            Some(stored) if stored == password.as_bytes() => Ok(()),
            _ => Err(unauthorized()),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

fn probe_matches(probe: &ProbeConfig, ctx: &RequestContext) -> bool {
    match probe {
        ProbeConfig::Header { name, value } => ctx
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == value),
        ProbeConfig::Path { path } => ctx.path == *path,
    }
}

/// Extracts (username, password) from a `Basic` Authorization header.
///
/// The auth-scheme is matched case-insensitively (RFC 7235 §2.1), so
/// `basic` and `BASIC` admit like `Basic`.
fn parse_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}
