//! Network configuration reconciliation
//!
//! Translates engine-dictated [`NetworkConfig`] values into host settings
//! and applies them idempotently: reapplying settings the OS already has
//! causes a brief window of packet loss and a burst of system activity, so
//! unchanged configurations are skipped entirely.

use crate::engine::commands::NetworkConfig;
use crate::error::Result;
use crate::host::{DnsSettings, Ipv4Settings, Ipv6Settings, NetworkSettings, TunnelHost};
use crate::sync::AsyncMutex;
use std::net::{IpAddr, Ipv4Addr};

/// Prefix lengths longer than this lose the default IPv6 route on some
/// hosts, so the advertised prefix is capped. The tunnel address is NATed
/// private space either way.
pub const MAX_IPV6_PREFIX_LEN: u8 = 125;

/// Placeholder configuration applied during start, before the engine has
/// reported its own. The addressing only needs to be accepted by the OS;
/// the first connected status replaces it.
pub fn placeholder_config() -> NetworkConfig {
    NetworkConfig {
        ipv4: Ipv4Addr::new(10, 75, 76, 77),
        dns: vec![IpAddr::V4(Ipv4Addr::new(10, 64, 0, 99))],
        ipv6: "fc00:bbbb:bbbb:bb01::c:4c4d/128"
            .parse()
            .expect("static placeholder address"),
        mtu: 1280,
    }
}

/// Build the host settings object for a configuration.
///
/// The tunnel is a point-to-point link: a /32 local address with the
/// default route via a single remote host address, and the IPv6 prefix
/// capped at [`MAX_IPV6_PREFIX_LEN`]. When system DNS fallback is wanted,
/// no match domains are claimed; otherwise all queries go to the tunnel.
pub fn build_network_settings(config: &NetworkConfig, use_system_dns: bool) -> NetworkSettings {
    NetworkSettings {
        tunnel_remote_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        mtu: config.mtu,
        ipv4: Ipv4Settings {
            address: config.ipv4,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 255),
            include_default_route: true,
        },
        ipv6: Ipv6Settings {
            address: config.ipv6.addr(),
            network_prefix_length: config.ipv6.prefix_len().min(MAX_IPV6_PREFIX_LEN),
            include_default_route: true,
        },
        dns: DnsSettings {
            servers: config.dns.clone(),
            match_domains: if use_system_dns {
                Vec::new()
            } else {
                vec![String::new()]
            },
        },
    }
}

struct CachedSettings {
    config: NetworkConfig,
    use_system_dns: bool,
}

/// Idempotently applies network configuration to the host.
///
/// The cache has its own lock, separate from the active flag, so status
/// driven reconfiguration never serializes OS calls behind a blocked start
/// or stop.
pub struct Reconciler {
    cached: AsyncMutex<Option<CachedSettings>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            cached: AsyncMutex::new(None),
        }
    }

    /// Apply `config` if it differs from the last applied configuration.
    ///
    /// The cache is updated only after the host accepts the settings, so a
    /// failed apply is retried naturally on the next status report.
    pub async fn ensure(
        &self,
        host: &dyn TunnelHost,
        config: NetworkConfig,
        use_system_dns: bool,
    ) -> Result<()> {
        let mut cached = self.cached.lock().await;
        if cached.as_ref().map(|c| &c.config) == Some(&config) {
            log::info!("keeping existing network config {config:?}");
            return Ok(());
        }
        log::info!("setting network config {config:?}");
        let settings = build_network_settings(&config, use_system_dns);
        host.apply_network_settings(settings).await?;
        *cached = Some(CachedSettings {
            config,
            use_system_dns,
        });
        Ok(())
    }

    /// Re-apply the cached configuration, if any.
    ///
    /// Used when a host-level flag change silently invalidates previously
    /// applied settings without a new status from the engine. Returns
    /// whether settings were applied.
    pub async fn reapply(&self, host: &dyn TunnelHost) -> Result<bool> {
        let cached = self.cached.lock().await;
        let Some(entry) = cached.as_ref() else {
            log::info!("no existing network config, nothing to re-apply");
            return Ok(false);
        };
        log::info!("re-applying network config {:?}", entry.config);
        let settings = build_network_settings(&entry.config, entry.use_system_dns);
        host.apply_network_settings(settings).await?;
        Ok(true)
    }

    /// Last successfully applied configuration
    pub async fn current(&self) -> Option<NetworkConfig> {
        self.cached.lock().await.as_ref().map(|c| c.config.clone())
    }
}
