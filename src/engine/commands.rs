//! Wire types for the JSON command boundary
//!
//! Everything here round-trips as camelCase JSON between the provider, the
//! engine, and the UI shells above. Keep field names stable; the shells
//! decode these shapes byte for byte.

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Commands accepted over the JSON boundary.
///
/// App messages decode into this shape and are forwarded to the engine
/// unmodified; the provider itself only ever issues `GetStatus` and
/// `SetTunnelArgs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineCmd {
    ApiGetAccountInfo {},
    GetStatus {
        known_version: Option<Uuid>,
    },
    GetTrafficStats {},
    Ping {},
    SetTunnelArgs {
        args: Option<TunnelArgs>,
        allow_activation: bool,
    },
}

/// Result of a forwarded command, as relayed back to the app shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CmdResult {
    OkJson(String),
    Error(String),
}

impl CmdResult {
    /// Encode for the wire. Serialization of this shape cannot realistically
    /// fail; if it somehow does, answer with a bare error code rather than
    /// dropping the response.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| br#"{"error":"other"}"#.to_vec())
    }
}

/// Engine-defined selector describing what to connect to.
///
/// Opaque to the provider: supplied by the host caller at start time and
/// passed through to the engine unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExitSelector {
    Any {},
    Exit {
        id: String,
    },
    City {
        country_code: String,
        city_code: String,
    },
    Country {
        country_code: String,
    },
}

impl Default for ExitSelector {
    fn default() -> Self {
        ExitSelector::Any {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TunnelArgs {
    pub exit: ExitSelector,
}

/// One exit as reported in a connected status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub id: String,
    pub country_code: String,
    pub city_code: String,
}

/// Network parameters the tunnel should use, as dictated by the engine.
///
/// Immutable once constructed and compared by value for reconciliation.
/// Produced by the engine's status reports, except for the placeholder the
/// controller synthesizes during start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub dns: Vec<IpAddr>,
    pub ipv4: Ipv4Addr,
    /// Tunnel address with its prefix length, e.g. `fc00::1/128`
    pub ipv6: Ipv6Net,
    pub mtu: u16,
}

/// Engine status snapshot.
///
/// Each snapshot invalidates the previous one; the version token is unique
/// per internal engine state change and drives the long-poll cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub version: Uuid,
    pub vpn_status: VpnStatus,
    #[serde(default)]
    pub use_system_dns: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VpnStatus {
    Disconnected {},
    Connecting {
        tunnel_args: TunnelArgs,
        reconnecting: bool,
    },
    Connected {
        tunnel_args: TunnelArgs,
        exit: ExitInfo,
        network_config: NetworkConfig,
        client_public_key: String,
        exit_public_key: String,
    },
}

/// Response type for commands that return nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Empty {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_wire_shape() {
        let cmd = EngineCmd::GetStatus {
            known_version: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"getStatus":{"knownVersion":null}}"#);

        let cmd = EngineCmd::SetTunnelArgs {
            args: Some(TunnelArgs::default()),
            allow_activation: true,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"setTunnelArgs":{"args":{"exit":{"any":{}}},"allowActivation":true}}"#
        );
    }

    #[test]
    fn test_exit_selector_round_trip() {
        let selector = ExitSelector::City {
            country_code: "CA".to_string(),
            city_code: "yyz".to_string(),
        };
        let json = serde_json::to_string(&selector).unwrap();
        assert_eq!(json, r#"{"city":{"countryCode":"CA","cityCode":"yyz"}}"#);
        let back: ExitSelector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, selector);
    }

    #[test]
    fn test_network_config_wire_shape() {
        let config: NetworkConfig = serde_json::from_str(
            r#"{"ipv4":"10.75.76.77","dns":["10.64.0.99"],"ipv6":"fc00:bbbb:bbbb:bb01::c:4c4d/128","mtu":1280}"#,
        )
        .unwrap();
        assert_eq!(config.ipv4, Ipv4Addr::new(10, 75, 76, 77));
        assert_eq!(config.dns, vec!["10.64.0.99".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.ipv6.prefix_len(), 128);
        assert_eq!(config.mtu, 1280);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["ipv6"], "fc00:bbbb:bbbb:bb01::c:4c4d/128");
    }

    #[test]
    fn test_status_decodes_connected_variant() {
        let json = r#"{
            "version": "7f2c0a4e-9a1f-4d7e-8a62-3f1df0c1b111",
            "vpnStatus": {
                "connected": {
                    "tunnelArgs": {"exit": {"any": {}}},
                    "exit": {"id": "yyz-1", "countryCode": "CA", "cityCode": "yyz"},
                    "networkConfig": {"ipv4": "10.75.76.77", "dns": ["10.64.0.99"], "ipv6": "fc00:bbbb:bbbb:bb01::c:4c4d/128", "mtu": 1280},
                    "clientPublicKey": "c2VjcmV0",
                    "exitPublicKey": "cHVibGlj"
                }
            }
        }"#;
        let status: Status = serde_json::from_str(json).unwrap();
        assert!(matches!(status.vpn_status, VpnStatus::Connected { .. }));
        assert!(!status.use_system_dns);
    }
}
