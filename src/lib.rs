//! Tunprov - Tunnel Provider Coordination Layer for VPN Extensions
//!
//! This is a **static library framework** that implements the lifecycle and
//! coordination layer between an operating system's VPN-extension runtime
//! and a packet-forwarding engine reachable only over an FFI boundary.
//!
//! ## What This Framework Provides
//! - Tunnel lifecycle state machine (start/stop/sleep/wake/app messages)
//! - Status sync loop long-polling the engine with a version cursor
//! - Idempotent network-settings reconciliation
//! - Bidirectional packet relay between the host queue and the engine
//! - Async concurrency primitives the above are built from
//! - C FFI bindings for embedding into platform extensions (Swift, Kotlin)
//!
//! ## What Your Application Must Implement
//! - The packet-forwarding engine behind [`engine::ffi::RawEngineApi`]
//! - The platform host glue behind [`ffi::RawHostApi`] (OS settings
//!   application, the packet queue, the reasserting flag)
//! - Secret/keychain storage for the engine's key material
//! - Platform-specific network path monitoring (feed
//!   [`ffi::tunprov_set_network_interface_index`])

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod netcfg;
pub mod provider;
pub mod relay;
pub mod sync;

mod registry;
mod status;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export core types for static library interface
pub use config::ProviderConfig;
pub use error::{ProviderError, Result};
pub use provider::{ProviderId, StartOptions, StopReason, TunnelProvider};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// C FFI Interface for embedding into platform extensions
pub mod ffi;
