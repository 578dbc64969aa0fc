//! Contract with the packet-forwarding engine
//!
//! The engine is reachable only through a foreign-function boundary: JSON
//! commands with string-code errors, raw packet bytes, and a handful of
//! fire-and-forget hints. [`Engine`] is the seam; [`ffi::FfiEngine`] is the
//! production implementation over the embedder-supplied function table.

pub mod commands;
pub mod ffi;

use crate::error::{ProviderError, Result};
use bytes::Bytes;
use commands::EngineCmd;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

/// Outcome of a JSON command round trip: the ok JSON payload, or the
/// engine's error code. Both sides are plain strings so the boundary never
/// carries structured exceptions.
pub type RawCmdResult = std::result::Result<String, String>;

/// The packet-forwarding engine, as visible across the FFI boundary.
pub trait Engine: Send + Sync + 'static {
    /// Submit a JSON command and resolve with the engine's response.
    ///
    /// `GetStatus` requests are held open by the engine until a status newer
    /// than the supplied version exists, so this future can be pending for
    /// an arbitrarily long time. Callers must not assume a deadline.
    fn json_cmd(&self, cmd: Bytes) -> BoxFuture<'static, RawCmdResult>;

    /// Forward one outbound packet. Fire and forget.
    fn send_packet(&self, packet: &[u8]);

    /// Hint the preferred egress interface; 0 clears the hint.
    fn set_network_interface_index(&self, index: u32);

    /// Forward a host power (wake) event.
    fn wake(&self);
}

/// Run a typed command against the engine.
///
/// Serializes `cmd`, round-trips it, and decodes the ok payload as `O`.
/// Engine error codes come back as [`ProviderError::Command`] with the code
/// relayed unmodified.
pub async fn run_cmd<O: DeserializeOwned>(engine: &dyn Engine, cmd: &EngineCmd) -> Result<O> {
    let json = serde_json::to_vec(cmd)?;
    match engine.json_cmd(Bytes::from(json)).await {
        Ok(ok_json) => Ok(serde_json::from_str(&ok_json)?),
        Err(code) => Err(ProviderError::Command(code)),
    }
}
