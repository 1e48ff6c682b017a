//! Store-driven HTTP gateway.
//!
//! The gateway turns a shared key-value store into a live routing and
//! policy table: every request resolves a vhost record, passes one of
//! several mutually exclusive access-control modes, and is handed to a
//! backend executor. A worker fleet (one per core, SO_REUSEPORT) serves
//! traffic only while its readiness marker in the store says `ready`.

pub mod collab;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod responses;
pub mod server;
pub mod supervisor;
pub mod vhost;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::run;
