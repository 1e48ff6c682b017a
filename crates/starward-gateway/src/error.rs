//! Gateway error types.

use axum::http::StatusCode;
use thiserror::Error;

use starward_state::KvError;

/// Terminal outcomes of the admission pipeline, plus process-level failures.
///
/// Response bodies are not derived from `Display`: the pipeline renders each
/// variant through the configured message catalogue so operator overrides
/// apply uniformly (see `responses.rs`).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Worker not ready")]
    NotReady,

    #[error("Route not found")]
    RouteNotFound,

    #[error("Maintenance active")]
    MaintenanceActive,

    #[error("Unauthorized")]
    Unauthorized { realm: Option<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::NotReady => "not_ready",
            Self::RouteNotFound => "route_not_found",
            Self::MaintenanceActive => "maintenance_active",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::MaintenanceActive => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::StoreUnavailable(_) | Self::NotReady | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<KvError> for GatewayError {
    fn from(err: KvError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
