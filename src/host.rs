//! Host framework seam
//!
//! The OS VPN-extension runtime owns the packet queue, the applied network
//! settings, and the host-visible connection state. This module defines the
//! trait the platform glue implements and the settings value objects the
//! reconciler hands to it.

use crate::error::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Network-layer protocol of a tunneled packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacketProtocol {
    Ipv4,
    Ipv6,
}

impl PacketProtocol {
    /// Classify a raw IP packet by its version nibble. Unrecognized
    /// versions are treated as IPv4, matching the host's default family.
    pub fn from_packet(packet: &[u8]) -> Self {
        match packet.first().map(|b| b >> 4) {
            Some(6) => PacketProtocol::Ipv6,
            _ => PacketProtocol::Ipv4,
        }
    }

    /// Address-family constant used when tagging packets for the host queue
    #[cfg(unix)]
    pub fn address_family(self) -> i32 {
        match self {
            PacketProtocol::Ipv4 => libc::AF_INET,
            PacketProtocol::Ipv6 => libc::AF_INET6,
        }
    }

    #[cfg(not(unix))]
    pub fn address_family(self) -> i32 {
        match self {
            PacketProtocol::Ipv4 => 2,
            PacketProtocol::Ipv6 => 23,
        }
    }
}

/// One outbound packet read from the host packet queue
#[derive(Debug, Clone)]
pub struct TunnelPacket {
    pub data: Bytes,
    pub protocol: PacketProtocol,
}

/// IPv4 side of the host settings object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4Settings {
    pub address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub include_default_route: bool,
}

/// IPv6 side of the host settings object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv6Settings {
    pub address: Ipv6Addr,
    pub network_prefix_length: u8,
    pub include_default_route: bool,
}

/// DNS side of the host settings object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsSettings {
    pub servers: Vec<IpAddr>,
    /// Domains whose queries are routed to `servers`. An empty-string entry
    /// matches everything; an empty list leaves non-default queries to the
    /// system resolver.
    pub match_domains: Vec<String>,
}

/// Host-level network settings, ready to be applied to the OS.
///
/// Built by the reconciler from a [`NetworkConfig`]; compared only through
/// the config it was built from.
///
/// [`NetworkConfig`]: crate::engine::commands::NetworkConfig
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    /// Single host address the default route points at
    pub tunnel_remote_address: IpAddr,
    pub mtu: u16,
    pub ipv4: Ipv4Settings,
    pub ipv6: Ipv6Settings,
    pub dns: DnsSettings,
}

/// The host framework, as visible to the provider.
///
/// Implementations are platform glue: they must be callable from any task
/// and must not assume the provider that created them is still current.
pub trait TunnelHost: Send + Sync + 'static {
    /// Apply network settings to the OS. Failing is normal when the device
    /// is offline; callers log and rely on the next reconciliation.
    fn apply_network_settings(&self, settings: NetworkSettings) -> BoxFuture<'static, Result<()>>;

    /// Raise or clear the host-visible reasserting flag.
    fn set_reasserting(&self, reasserting: bool);

    /// Read the next batch of outbound packets from the host queue.
    ///
    /// The host holds the request open until packets are available; there is
    /// no way to cancel it. A superseded provider's pending read may resolve
    /// arbitrarily late or never.
    fn read_packets(&self) -> BoxFuture<'static, Result<Vec<TunnelPacket>>>;

    /// Queue one inbound packet into the OS, tagged with its protocol.
    fn write_packet(&self, packet: Bytes, protocol: PacketProtocol);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_version_nibble() {
        assert_eq!(
            PacketProtocol::from_packet(&[0x45, 0x00]),
            PacketProtocol::Ipv4
        );
        assert_eq!(
            PacketProtocol::from_packet(&[0x60, 0x00]),
            PacketProtocol::Ipv6
        );
        assert_eq!(PacketProtocol::from_packet(&[]), PacketProtocol::Ipv4);
    }

    #[cfg(unix)]
    #[test]
    fn test_address_family_constants() {
        assert_eq!(PacketProtocol::Ipv4.address_family(), libc::AF_INET);
        assert_eq!(PacketProtocol::Ipv6.address_family(), libc::AF_INET6);
    }
}
