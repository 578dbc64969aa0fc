//! Packet relay between the host queue and the engine
//!
//! Outbound: a pump that reads batches from the host packet queue, forwards
//! each packet individually over the FFI boundary, and immediately re-arms
//! the read. The host offers no cancellation for these reads, so the pump
//! instead detects supersession by instance id and stands down.
//!
//! Inbound: the engine delivers single packets on its own thread through a
//! process-global entry point; the current live instance re-injects them
//! into the host queue tagged with their network-layer protocol.

use crate::host::PacketProtocol;
use crate::provider::TunnelProvider;
use crate::registry;
use bytes::Bytes;
use std::sync::Arc;

/// Spawn the outbound packet pump for `provider`.
pub(crate) fn spawn_send_loop(provider: &Arc<TunnelProvider>) {
    let weak = Arc::downgrade(provider);
    let id = provider.id().clone();
    let host = provider.host();
    let engine = provider.engine();
    tokio::spawn(async move {
        loop {
            let batch = match host.read_packets().await {
                Ok(batch) => batch,
                Err(e) => {
                    log::error!("send loop read failed for provider {id}: {e}");
                    break;
                }
            };
            if weak.upgrade().is_none() {
                log::error!("send loop for dropped provider {id} called");
                break;
            }
            if !registry::is_current(&id) {
                log::error!("send loop for superseded provider {id} called");
                break;
            }
            for packet in batch {
                engine.send_packet(&packet.data);
            }
        }
    });
}

/// Deliver one inbound packet from the engine.
///
/// Called on an engine-owned thread. Packets arriving while no provider is
/// live are logged and dropped; the engine keeps no queue on its side.
pub fn receive_packet(packet: &[u8]) {
    let Some(provider) = registry::current() else {
        log::error!("packet callback called with no live provider");
        return;
    };
    let protocol = PacketProtocol::from_packet(packet);
    provider
        .host()
        .write_packet(Bytes::copy_from_slice(packet), protocol);
}
