//! Common test utilities for gateway integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use starward_gateway::collab::{
    BackendExecutor, RateLimitCheck, RateLimitDecision, RestrictedCheck,
};
use starward_gateway::config::GatewayConfig;
use starward_gateway::error::GatewayError;
use starward_gateway::pipeline::RequestContext;
use starward_gateway::server::{build_pipeline, router, Collaborators};
use starward_gateway::vhost::VhostRecord;
use starward_state::{KvBackend, KvError, MemoryKv};

pub const HOST: &str = "host1";

/// Executor double that records invocations.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: AtomicUsize,
}

impl RecordingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendExecutor for RecordingExecutor {
    async fn execute(
        &self,
        _ctx: &RequestContext,
        _record: &VhostRecord,
    ) -> Result<Response, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(Body::from("executed")))
    }
}

/// Rate-limit double with a fixed verdict; denials author their own response.
pub struct StaticRateLimit {
    admit: bool,
    calls: AtomicUsize,
}

impl StaticRateLimit {
    pub fn new(admit: bool) -> Self {
        Self {
            admit,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateLimitCheck for StaticRateLimit {
    async fn check(
        &self,
        _ctx: &RequestContext,
        _record: &VhostRecord,
    ) -> Result<RateLimitDecision, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.admit {
            Ok(RateLimitDecision::Admitted)
        } else {
            let mut response = Response::new(Body::from("limited"));
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            Ok(RateLimitDecision::Denied(response))
        }
    }
}

/// Restricted-list double with a fixed verdict.
pub struct StaticRestricted {
    allow: bool,
    calls: AtomicUsize,
}

impl StaticRestricted {
    pub fn new(allow: bool) -> Self {
        Self {
            allow,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestrictedCheck for StaticRestricted {
    async fn check(&self, _ctx: &RequestContext, _spec: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.allow
    }
}

/// Store double whose every operation fails.
pub struct FailingKv;

#[async_trait]
impl KvBackend for FailingKv {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Err(KvError::Connection("connection refused".into()))
    }

    async fn put(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        Err(KvError::Connection("connection refused".into()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, KvError> {
        Err(KvError::Connection("connection refused".into()))
    }

    async fn hget_all(&self, _key: &str) -> Result<Option<HashMap<String, String>>, KvError> {
        Err(KvError::Connection("connection refused".into()))
    }

    async fn hset_all(
        &self,
        _key: &str,
        _fields: &HashMap<String, String>,
    ) -> Result<(), KvError> {
        Err(KvError::Connection("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<bool, KvError> {
        Err(KvError::Connection("connection refused".into()))
    }
}

/// Complete test gateway with collaborator doubles wired in.
pub struct TestGateway {
    pub kv: Arc<MemoryKv>,
    pub router: Router,
    pub executor: Arc<RecordingExecutor>,
    pub rate_limit: Arc<StaticRateLimit>,
    pub restricted: Arc<StaticRestricted>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::build(config, true, true)
    }

    pub fn with_verdicts(rate_limit_admit: bool, restricted_allow: bool) -> Self {
        Self::build(GatewayConfig::default(), rate_limit_admit, restricted_allow)
    }

    fn build(config: GatewayConfig, rate_limit_admit: bool, restricted_allow: bool) -> Self {
        let kv = Arc::new(MemoryKv::new());
        let executor = Arc::new(RecordingExecutor::default());
        let rate_limit = Arc::new(StaticRateLimit::new(rate_limit_admit));
        let restricted = Arc::new(StaticRestricted::new(restricted_allow));

        let collaborators = Collaborators {
            rate_limit: rate_limit.clone(),
            restricted: restricted.clone(),
            executor: executor.clone(),
        };

        let (_registry, pipeline) = build_pipeline(&config, kv.clone(), HOST, collaborators);

        Self {
            kv,
            router: router(pipeline),
            executor,
            rate_limit,
            restricted,
        }
    }

    /// Builds a gateway whose store is down entirely.
    pub fn with_failing_store() -> Router {
        let config = GatewayConfig::default();
        let kv: Arc<dyn KvBackend> = Arc::new(FailingKv);

        let collaborators = Collaborators {
            rate_limit: Arc::new(StaticRateLimit::new(true)),
            restricted: Arc::new(StaticRestricted::new(true)),
            executor: Arc::new(RecordingExecutor::default()),
        };

        let (_registry, pipeline) = build_pipeline(&config, kv, HOST, collaborators);
        router(pipeline)
    }

    /// Marks this worker's readiness key `ready`.
    pub async fn mark_ready(&self) {
        self.set_instance_status("ready").await;
    }

    pub async fn set_instance_status(&self, status: &str) {
        self.kv
            .put(&format!("instances:{HOST}"), status.as_bytes(), None)
            .await
            .unwrap();
    }

    /// Seeds a vhost record for (HOST, path).
    pub async fn seed_vhost(&self, path: &str, fields: &[(&str, &str)]) {
        let fields: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.kv
            .hset_all(&format!("vhost:{HOST}:{path}"), &fields)
            .await
            .unwrap();
    }

    /// Seeds a basic-auth credential for (HOST, username).
    pub async fn seed_credential(&self, username: &str, password: &str) {
        self.kv
            .put(
                &format!("basic:auth:{HOST}:{username}"),
                password.as_bytes(),
                None,
            )
            .await
            .unwrap();
    }
}

/// Builds a request against the test host.
pub fn request(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", HOST)
        .body(Body::empty())
        .unwrap()
}

/// Same as [`request`], with an extra header.
pub fn request_with_header(
    method: &str,
    path: &str,
    name: &str,
    value: &str,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", HOST)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

/// Builds a request carrying Basic credentials.
pub fn authed_request(method: &str, path: &str, username: &str, password: &str) -> Request<Body> {
    let encoded = BASE64.encode(format!("{username}:{password}"));
    request_with_header(method, path, "authorization", &format!("Basic {encoded}"))
}

/// Reads a response body to a string.
pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
