//! Collaborator interfaces consumed by the admission pipeline.
//!
//! The rate-limit check, the restricted-list check and the backend executor
//! are external collaborators: the pipeline specifies only their boundary.
//! Bundled defaults are provided so the binary runs standalone; deployments
//! swap in their own implementations through
//! [`crate::server::Collaborators`].

use std::num::NonZeroU32;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::GatewayError;
use crate::pipeline::RequestContext;
use crate::vhost::VhostRecord;

/// Outcome of the rate-limit collaborator.
pub enum RateLimitDecision {
    Admitted,
    /// Denied, with the denial response the collaborator authored itself.
    /// Its status and body are outside the gateway's contract.
    Denied(Response),
}

/// Rate-limit collaborator. May author its own denial response.
#[async_trait]
pub trait RateLimitCheck: Send + Sync {
    async fn check(
        &self,
        ctx: &RequestContext,
        record: &VhostRecord,
    ) -> Result<RateLimitDecision, GatewayError>;
}

/// Restricted-list collaborator. Writes nothing; the gateway authors the
/// denial response on `false`.
#[async_trait]
pub trait RestrictedCheck: Send + Sync {
    async fn check(&self, ctx: &RequestContext, spec: &str) -> bool;
}

/// Backend executor. Owns the final response once a request is admitted.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &RequestContext,
        record: &VhostRecord,
    ) -> Result<Response, GatewayError>;
}

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bundled rate limiter: a keyed token bucket per (host, path) route.
pub struct GovernorRateLimit {
    limiter: KeyedLimiter,
}

impl GovernorRateLimit {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_second =
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);

        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }
}

#[async_trait]
impl RateLimitCheck for GovernorRateLimit {
    async fn check(
        &self,
        ctx: &RequestContext,
        _record: &VhostRecord,
    ) -> Result<RateLimitDecision, GatewayError> {
        let key = format!("{}:{}", ctx.host, ctx.path);

        match self.limiter.check_key(&key) {
            Ok(()) => Ok(RateLimitDecision::Admitted),
            Err(_) => {
                debug!(host = %ctx.host, path = %ctx.path, "Rate limit exceeded");
                let mut response =
                    Response::new(Body::from("rate limit exceeded"));
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                Ok(RateLimitDecision::Denied(response))
            }
        }
    }
}

impl std::fmt::Debug for GovernorRateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorRateLimit").finish_non_exhaustive()
    }
}

/// Bundled restricted checker: the restriction spec is a comma-separated
/// allow-list matched against the request's forwarded source address.
#[derive(Debug, Default)]
pub struct SourceAllowList;

impl SourceAllowList {
    pub fn new() -> Self {
        Self
    }

    fn source_of(ctx: &RequestContext) -> Option<String> {
        if let Some(forwarded) = ctx.headers.get("x-forwarded-for") {
            if let Ok(value) = forwarded.to_str() {
                if let Some(first) = value.split(',').next() {
                    return Some(first.trim().to_owned());
                }
            }
        }
        ctx.headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned())
    }
}

#[async_trait]
impl RestrictedCheck for SourceAllowList {
    async fn check(&self, ctx: &RequestContext, spec: &str) -> bool {
        let Some(source) = Self::source_of(ctx) else {
            return false;
        };
        spec.split(',').any(|allowed| allowed.trim() == source)
    }
}

/// Bundled executor: answers with a JSON summary of the admitted route.
#[derive(Debug, Default)]
pub struct EchoExecutor;

impl EchoExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackendExecutor for EchoExecutor {
    async fn execute(
        &self,
        ctx: &RequestContext,
        _record: &VhostRecord,
    ) -> Result<Response, GatewayError> {
        let body = serde_json::json!({
            "host": ctx.host,
            "method": ctx.method,
            "path": ctx.path,
            "query": ctx.query,
        });

        let mut response = Response::new(Body::from(body.to_string()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn ctx_with_source(source: Option<&str>) -> RequestContext {
        let mut headers = HeaderMap::new();
        if let Some(source) = source {
            headers.insert("x-forwarded-for", source.parse().unwrap());
        }
        RequestContext {
            method: "GET".to_string(),
            host: "host1".to_string(),
            path: "/x".to_string(),
            query: None,
            headers,
        }
    }

    fn record() -> VhostRecord {
        VhostRecord {
            method: "GET".to_string(),
            maintenance: false,
            policy: crate::vhost::AccessPolicy::Open,
        }
    }

    #[tokio::test]
    async fn allow_list_matches_forwarded_source() {
        let checker = SourceAllowList::new();

        let ctx = ctx_with_source(Some("10.0.0.1"));
        assert!(checker.check(&ctx, "10.0.0.1,10.0.0.2").await);
        assert!(!checker.check(&ctx, "10.0.0.9").await);
    }

    #[tokio::test]
    async fn allow_list_denies_unknown_source() {
        let checker = SourceAllowList::new();

        let ctx = ctx_with_source(None);
        assert!(!checker.check(&ctx, "10.0.0.1").await);
    }

    #[tokio::test]
    async fn allow_list_uses_first_forwarded_hop() {
        let checker = SourceAllowList::new();

        let ctx = ctx_with_source(Some("10.0.0.1, 192.168.0.1"));
        assert!(checker.check(&ctx, "10.0.0.1").await);
        assert!(!checker.check(&ctx, "192.168.0.1").await);
    }

    #[tokio::test]
    async fn rate_limiter_denies_after_burst() {
        let limiter = GovernorRateLimit::new(&RateLimitConfig {
            requests_per_second: 1,
            burst_size: 2,
        });

        let ctx = ctx_with_source(None);
        let record = record();

        assert!(matches!(
            limiter.check(&ctx, &record).await.unwrap(),
            RateLimitDecision::Admitted
        ));
        assert!(matches!(
            limiter.check(&ctx, &record).await.unwrap(),
            RateLimitDecision::Admitted
        ));

        match limiter.check(&ctx, &record).await.unwrap() {
            RateLimitDecision::Denied(response) => {
                assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            }
            RateLimitDecision::Admitted => panic!("expected denial after burst"),
        }
    }

    #[tokio::test]
    async fn rate_limiter_buckets_per_route() {
        let limiter = GovernorRateLimit::new(&RateLimitConfig {
            requests_per_second: 1,
            burst_size: 1,
        });

        let record = record();

        let ctx_a = ctx_with_source(None);
        let mut ctx_b = ctx_with_source(None);
        ctx_b.path = "/other".to_string();

        assert!(matches!(
            limiter.check(&ctx_a, &record).await.unwrap(),
            RateLimitDecision::Admitted
        ));
        // A different route has its own bucket.
        assert!(matches!(
            limiter.check(&ctx_b, &record).await.unwrap(),
            RateLimitDecision::Admitted
        ));
    }
}
