//! Tunnel lifecycle controller
//!
//! One [`TunnelProvider`] exists per process activation, owned by the host
//! framework. It serializes start/stop/reconfiguration through an async
//! exclusivity lock, drives the engine over the command boundary, and lets
//! the status and packet loops run fully concurrently so that forwarding
//! never stalls behind a blocked lifecycle operation.

use crate::config::ProviderConfig;
use crate::engine::commands::{CmdResult, Empty, EngineCmd, Status, TunnelArgs, VpnStatus};
use crate::engine::{run_cmd, Engine};
use crate::error::{ProviderError, Result};
use crate::host::TunnelHost;
use crate::netcfg::{build_network_settings, placeholder_config, Reconciler};
use crate::sync::{AsyncMutex, PendingTasks, WatchableValue};
use crate::{registry, relay, status};
use bytes::Bytes;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// Random identifier for one provider activation.
///
/// Exists to diagnose host bugs that keep multiple instances alive at once:
/// stale callbacks compare their captured id against the registry instead of
/// trusting that they belong to the live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self((0..5).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options supplied by the host caller at start time
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// JSON-encoded tunnel arguments, passed through to the engine
    /// unmodified. Absent means "any exit".
    pub tunnel_args: Option<String>,
    /// Abort before touching the engine. Used by the app to force the host
    /// framework through a start/stop cycle without bringing up a tunnel.
    pub dont_start_tunnel: bool,
}

/// Host-reported reason for a stop, used for logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    None,
    UserInitiated,
    ProviderDisabled,
    ConfigurationFailed,
    Superseded,
    Other(i32),
}

impl StopReason {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => StopReason::None,
            1 => StopReason::UserInitiated,
            2 => StopReason::ProviderDisabled,
            3 => StopReason::ConfigurationFailed,
            4 => StopReason::Superseded,
            other => StopReason::Other(other),
        }
    }
}

/// The lifecycle controller exposed to the host framework.
pub struct TunnelProvider {
    id: ProviderId,
    config: ProviderConfig,
    engine: Arc<dyn Engine>,
    host: Arc<dyn TunnelHost>,
    is_active: AsyncMutex<bool>,
    is_connected: WatchableValue<bool>,
    reconciler: Reconciler,
    pending_messages: PendingTasks,
}

impl TunnelProvider {
    /// Create a provider and start its background loops.
    ///
    /// Must be called from within the async runtime. The returned instance
    /// becomes the process-wide current provider.
    pub fn new(
        config: ProviderConfig,
        engine: Arc<dyn Engine>,
        host: Arc<dyn TunnelHost>,
    ) -> Arc<Self> {
        let id = ProviderId::generate();
        log::info!("provider init entry {id}");
        let provider = Arc::new(Self {
            id,
            config,
            engine,
            host,
            is_active: AsyncMutex::new(false),
            is_connected: WatchableValue::new(false),
            reconciler: Reconciler::new(),
            pending_messages: PendingTasks::new(),
        });
        registry::register(&provider);
        relay::spawn_send_loop(&provider);
        status::spawn_status_loop(&provider);
        log::info!("provider init exit {}", provider.id);
        provider
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub(crate) fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub(crate) fn host(&self) -> Arc<dyn TunnelHost> {
        self.host.clone()
    }

    pub(crate) fn connectivity(&self) -> &WatchableValue<bool> {
        &self.is_connected
    }

    /// Start the tunnel.
    ///
    /// The active check and transition happen atomically under the
    /// exclusivity lock; this is the sole guard against double-start races
    /// from the host. The connectivity wait happens outside the lock so
    /// status processing and app messages keep flowing while the tunnel
    /// comes up.
    ///
    /// # Errors
    /// [`ProviderError::AlreadyActive`] if the tunnel is active, before any
    /// engine command is issued. Engine and host failures leave the tunnel
    /// inactive.
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        log::info!("start entry {}", self.id);

        if options.dont_start_tunnel {
            log::error!("start {} aborting due to dry-run option", self.id);
            return Err(ProviderError::StartAborted(
                "dry-run start requested".to_string(),
            ));
        }

        let args: TunnelArgs = match &options.tunnel_args {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| ProviderError::Protocol(format!("invalid tunnel args: {e}")))?,
            None => {
                log::info!("start {} called without tunnel args, using defaults", self.id);
                TunnelArgs::default()
            }
        };

        {
            let mut is_active = self.is_active.lock().await;
            if *is_active {
                log::error!("start called on active tunnel {}", self.id);
                return Err(ProviderError::AlreadyActive);
            }

            // Placeholder addressing so the OS accepts the tunnel before the
            // engine reports real parameters. Applied directly, not through
            // the reconciler cache: the first connected status must apply
            // the engine's configuration even if it matches these values.
            let settings = build_network_settings(&placeholder_config(), false);
            self.host.apply_network_settings(settings).await?;

            let Empty {} = run_cmd(
                &*self.engine,
                &EngineCmd::SetTunnelArgs {
                    args: Some(args),
                    allow_activation: true,
                },
            )
            .await?;

            log::info!("set tunnel active flag {}", self.id);
            *is_active = true;
        }

        if self.config.wait_for_connected_on_start {
            log::info!("waiting for tunnel to start {}", self.id);
            self.is_connected.wait_until(|connected| *connected).await;
        }

        log::info!("start exit {}", self.id);
        Ok(())
    }

    /// Stop the tunnel. Never fails; engine errors are logged and the
    /// teardown continues.
    ///
    /// After the connectivity state reads disconnected and in-flight app
    /// messages drain, the process is deliberately terminated: the host
    /// framework stops delivering callbacks to an instance whose stop has
    /// returned, so no further cleanup could ever run.
    pub async fn stop(&self, reason: StopReason) {
        log::info!("stop entry {} reason {reason:?}", self.id);
        {
            let mut is_active = self.is_active.lock().await;
            if !*is_active {
                log::warn!("stop called on inactive tunnel {}", self.id);
            }
            log::info!("unset tunnel active flag {}", self.id);
            *is_active = false;

            log::info!("stopping tunnel {}", self.id);
            if let Err(e) = run_cmd::<Empty>(
                &*self.engine,
                &EngineCmd::SetTunnelArgs {
                    args: None,
                    allow_activation: false,
                },
            )
            .await
            {
                log::error!("clearing tunnel args failed: {e}");
            }
        }

        log::info!("waiting for tunnel to stop {}", self.id);
        self.is_connected.wait_until(|connected| !connected).await;
        self.pending_messages.wait_for_all().await;

        log::info!("stop exit and terminate {}", self.id);
        self.terminate();
    }

    /// Handle one app message and produce its response.
    ///
    /// The response is always produced, exactly once: decode failures and
    /// state errors answer with a wire error code instead of failing.
    pub async fn handle_app_message(&self, msg: &[u8]) -> Vec<u8> {
        let _guard = self.pending_messages.guard();

        let cmd: EngineCmd = match serde_json::from_slice(msg) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::error!("app message failed to decode: {e}");
                let code = ProviderError::Protocol(e.to_string()).code().to_string();
                return CmdResult::Error(code).encode();
            }
        };

        if matches!(cmd, EngineCmd::SetTunnelArgs { .. }) {
            // This command can resurrect a tunnel that a racing stop just
            // tore down, so it is refused while inactive and forwarded under
            // the lock otherwise.
            let is_active = self.is_active.lock().await;
            if !*is_active {
                log::warn!("refusing tunnel args change on inactive tunnel {}", self.id);
                let code = ProviderError::Inactive.code().to_string();
                return CmdResult::Error(code).encode();
            }
            return self.forward_app_message(msg).await;
        }

        self.forward_app_message(msg).await
    }

    /// Forward the raw message bytes to the engine unmodified and relay its
    /// response or error code back unmodified.
    async fn forward_app_message(&self, msg: &[u8]) -> Vec<u8> {
        let result = match self.engine.json_cmd(Bytes::copy_from_slice(msg)).await {
            Ok(ok_json) => CmdResult::OkJson(ok_json),
            Err(code) => CmdResult::Error(code),
        };
        result.encode()
    }

    /// Host power events. Hook points only; the engine handles wake-induced
    /// reconnects on its own once notified.
    pub fn sleep(&self) {
        log::info!("sleep entry {}", self.id);
        log::info!("sleep exit {}", self.id);
    }

    pub fn wake(&self) {
        log::info!("wake entry {}", self.id);
        self.engine.wake();
        log::info!("wake exit {}", self.id);
    }

    /// React to a host-driven protocol configuration change.
    ///
    /// Enabling include-all-networks silently invalidates previously applied
    /// settings without a new status from the engine, so the cached
    /// configuration is re-applied while the tunnel is active.
    pub async fn protocol_configuration_change(
        &self,
        old_include_all_networks: bool,
        new_include_all_networks: bool,
    ) {
        log::info!(
            "protocol configuration change entry {} ({old_include_all_networks} to {new_include_all_networks})",
            self.id
        );
        if old_include_all_networks || !new_include_all_networks {
            log::info!("no interesting changes");
            return;
        }
        log::info!("include-all-networks has been enabled");

        let is_active = self.is_active.lock().await;
        if !*is_active {
            log::info!("not active, ignoring");
            return;
        }
        if let Err(e) = self.reconciler.reapply(&*self.host).await {
            log::error!("failed to re-apply network settings, user is probably offline: {e}");
        }
        log::info!("protocol configuration change exit {}", self.id);
    }

    /// Hint the preferred egress interface to the engine. `None` or an
    /// out-of-range index clears the hint.
    pub fn set_network_interface_index(&self, index: Option<u32>) {
        match index {
            Some(index) if index > 0 => self.engine.set_network_interface_index(index),
            Some(index) => {
                log::error!("network interface index out of range: {index}");
                self.engine.set_network_interface_index(0);
            }
            None => self.engine.set_network_interface_index(0),
        }
    }

    /// Apply one status snapshot from the sync loop.
    ///
    /// Connectivity publishes before the active flag is taken so that a
    /// start or stop blocked on the watchable resolves even while this call
    /// waits for the lock they hold.
    pub(crate) async fn process_status_update(&self, status: Status) {
        log::info!("processing status update {}", status.version);
        let connected = matches!(status.vpn_status, VpnStatus::Connected { .. });
        self.is_connected.publish(connected);

        let is_active = self.is_active.lock().await;
        match status.vpn_status {
            VpnStatus::Disconnected {} | VpnStatus::Connecting { .. } => {
                if *is_active && self.config.reassert_while_connecting {
                    self.host.set_reasserting(true);
                }
            }
            VpnStatus::Connected { network_config, .. } => {
                if *is_active {
                    match self
                        .reconciler
                        .ensure(&*self.host, network_config, status.use_system_dns)
                        .await
                    {
                        Ok(()) => self.host.set_reasserting(false),
                        Err(e) => log::error!("setting network config failed: {e}"),
                    }
                }
            }
        }
        log::info!("finished processing status update {}", status.version);
    }

    /// Terminal transition: tear the process down.
    ///
    /// The host framework stops delivering callbacks to an instance that
    /// has returned from stop (and, when offline, skips stop entirely), so
    /// a live process would hang all further IPC until the OS recycles it.
    fn terminate(&self) {
        log::info!("terminating process {}", self.id);
        exit_process();
    }
}

impl Drop for TunnelProvider {
    fn drop(&mut self) {
        log::info!("provider deinit {}", self.id);
        // Host teardown without a stop call leaves the same dead-instance
        // IPC problem as a completed stop.
        exit_process();
    }
}

#[cfg(all(feature = "process-exit", not(test)))]
fn exit_process() {
    std::process::exit(0);
}

#[cfg(any(not(feature = "process-exit"), test))]
fn exit_process() {
    log::warn!("process exit suppressed by build configuration");
}
