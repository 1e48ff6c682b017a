//! Vhost record resolution.
//!
//! Routing records live in the shared store as field maps under
//! `vhost:{host}:{path}`, authored by an external control plane and never
//! written here. The untyped mode flags (`basicAuth` / `ratelimit` /
//! `restricted`) are decoded once at resolution time into a tagged
//! [`AccessPolicy`], so the policy chain matches on a variant instead of
//! re-checking field presence in sequence.

use std::collections::HashMap;
use std::sync::Arc;

use starward_state::KvBackend;

use crate::error::GatewayError;

/// Access-control mode of a routing record. At most one applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// No access control; admitted requests go straight to the executor.
    Open,
    /// HTTP Basic authentication against stored per-host credentials.
    BasicAuth,
    /// Delegated to the rate-limit collaborator; carries its raw parameters.
    RateLimit(String),
    /// Delegated to the restricted-list collaborator; carries the allow-list
    /// specification.
    Restricted(String),
}

/// A decoded routing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostRecord {
    /// Expected HTTP method; anything else is treated as route-not-found.
    pub method: String,
    /// When set, the route answers 503 before any policy runs.
    pub maintenance: bool,
    pub policy: AccessPolicy,
}

impl VhostRecord {
    /// Decodes a stored field map.
    ///
    /// Flag priority when a record carries several mode fields: basicAuth,
    /// then ratelimit, then restricted — first match wins, matching the
    /// chain's evaluation order.
    fn from_fields(fields: &HashMap<String, String>) -> Self {
        let policy = if field_set(fields, "basicAuth") {
            AccessPolicy::BasicAuth
        } else if let Some(params) = set_field(fields, "ratelimit") {
            AccessPolicy::RateLimit(params.to_owned())
        } else if let Some(spec) = set_field(fields, "restricted") {
            AccessPolicy::Restricted(spec.to_owned())
        } else {
            AccessPolicy::Open
        };

        Self {
            method: fields.get("method").cloned().unwrap_or_default(),
            maintenance: field_set(fields, "maintenance"),
            policy,
        }
    }
}

/// A field counts as set when present and not an explicit off-value.
fn field_set(fields: &HashMap<String, String>, name: &str) -> bool {
    set_field(fields, name).is_some()
}

fn set_field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != "0" && *v != "false")
}

/// Resolves (host, path, method) to a routing record.
pub struct VhostResolver {
    kv: Arc<dyn KvBackend>,
}

impl VhostResolver {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    fn record_key(host: &str, path: &str) -> String {
        format!("vhost:{host}:{path}")
    }

    /// Looks up the record for (host, path).
    ///
    /// Returns `None` both when no record exists and when the stored method
    /// differs from `method` — the two cases are indistinguishable by
    /// contract and share the 404 branch.
    pub async fn resolve(
        &self,
        host: &str,
        path: &str,
        method: &str,
    ) -> Result<Option<VhostRecord>, GatewayError> {
        let key = Self::record_key(host, path);
        let Some(fields) = self.kv.hget_all(&key).await? else {
            return Ok(None);
        };

        let record = VhostRecord::from_fields(&fields);
        if record.method != method {
            return Ok(None);
        }

        Ok(Some(record))
    }
}

impl std::fmt::Debug for VhostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VhostResolver").finish_non_exhaustive()
    }
}
