//! Gateway-authored responses.
//!
//! Every response body the gateway writes itself comes through this
//! catalogue, so the configured overrides (and the optional `Content-Type`
//! override) apply to all branches uniformly. Collaborator-authored
//! responses (rate-limit denials, executor output) bypass it by contract.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::Messages;
use crate::error::GatewayError;

const DEFAULT_NOT_READY: &str = "not ready";
const DEFAULT_NOT_FOUND: &str = "not found";
const DEFAULT_MAINTENANCE: &str = "maintenance";
const DEFAULT_STORE_ERROR: &str = "store error";
const DEFAULT_HEALTH_OK: &str = "UP";
const DEFAULT_ACCESS_DENIED: &str = "Access denied";

/// Resolved message catalogue.
#[derive(Debug, Clone)]
pub struct ResponseCatalog {
    not_ready: String,
    not_found: String,
    maintenance: String,
    store_error: String,
    health_ok: String,
    content_type: Option<HeaderValue>,
}

impl ResponseCatalog {
    pub fn new(messages: &Messages) -> Self {
        let content_type = messages
            .content_type
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok());

        Self {
            not_ready: resolve(&messages.not_ready, DEFAULT_NOT_READY),
            not_found: resolve(&messages.not_found, DEFAULT_NOT_FOUND),
            maintenance: resolve(&messages.maintenance, DEFAULT_MAINTENANCE),
            store_error: resolve(&messages.store_error, DEFAULT_STORE_ERROR),
            health_ok: resolve(&messages.health_ok, DEFAULT_HEALTH_OK),
            content_type,
        }
    }

    pub fn health_ok(&self) -> Response {
        self.build(StatusCode::OK, self.health_ok.clone())
    }

    /// Renders a terminal pipeline error as its fixed-per-branch response.
    pub fn render(&self, error: &GatewayError) -> Response {
        match error {
            GatewayError::NotReady => {
                self.build(StatusCode::INTERNAL_SERVER_ERROR, self.not_ready.clone())
            }
            GatewayError::RouteNotFound => {
                self.build(StatusCode::NOT_FOUND, self.not_found.clone())
            }
            GatewayError::MaintenanceActive => {
                self.build(StatusCode::SERVICE_UNAVAILABLE, self.maintenance.clone())
            }
            GatewayError::Unauthorized { realm } => self.unauthorized(realm.as_deref()),
            GatewayError::StoreUnavailable(_) | GatewayError::Config(_) | GatewayError::Io(_) => {
                self.build(StatusCode::INTERNAL_SERVER_ERROR, self.store_error.clone())
            }
        }
    }

    fn unauthorized(&self, realm: Option<&str>) -> Response {
        let mut response = self.build(StatusCode::UNAUTHORIZED, DEFAULT_ACCESS_DENIED.to_owned());

        if let Some(realm) = realm {
            if let Ok(challenge) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge);
            }
        }

        response
    }

    fn build(&self, status: StatusCode, body: String) -> Response {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        if let Some(content_type) = &self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type.clone());
        }
        response
    }
}

fn resolve(configured: &Option<String>, fallback: &str) -> String {
    configured.clone().unwrap_or_else(|| fallback.to_owned())
}
