//! Shared key-value store client for the Starward gateway.
//!
//! Workers coordinate exclusively through an external store (Valkey/Redis in
//! production, in-memory for tests): readiness markers, vhost routing records
//! and basic-auth credentials all live behind the [`KvBackend`] trait.

mod error;
mod traits;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "valkey")]
mod valkey;

pub use error::KvError;
pub use traits::KvBackend;

#[cfg(feature = "memory")]
pub use memory::MemoryKv;

#[cfg(feature = "valkey")]
pub use valkey::ValkeyKv;
