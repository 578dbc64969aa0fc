//! Shared test doubles for the engine and host seams

use crate::engine::commands::{
    EngineCmd, ExitInfo, NetworkConfig, Status, TunnelArgs, VpnStatus,
};
use crate::engine::{Engine, RawCmdResult};
use crate::error::{ProviderError, Result};
use crate::host::{NetworkSettings, PacketProtocol, TunnelHost, TunnelPacket};
use crate::sync::WatchableValue;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Serializes tests that touch the process-wide provider registry.
pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `condition` until it holds or a deadline passes.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scriptable engine double.
///
/// Records every command, answers `GetStatus` with real long-poll semantics
/// against a watchable status slot, and answers everything else with an
/// empty ok payload.
pub(crate) struct MockEngine {
    cmds: Mutex<Vec<EngineCmd>>,
    status: Arc<WatchableValue<Status>>,
    fail: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
    interface_indexes: Mutex<Vec<u32>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cmds: Mutex::new(Vec::new()),
            status: Arc::new(WatchableValue::new(Status {
                version: Uuid::new_v4(),
                vpn_status: VpnStatus::Disconnected {},
                use_system_dns: false,
            })),
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            interface_indexes: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<EngineCmd> {
        self.cmds.lock().unwrap().clone()
    }

    pub fn set_tunnel_args_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| matches!(cmd, EngineCmd::SetTunnelArgs { .. }))
            .count()
    }

    pub fn get_status_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| matches!(cmd, EngineCmd::GetStatus { .. }))
            .count()
    }

    /// Commands other than the status loop's own polling
    pub fn non_status_commands(&self) -> Vec<EngineCmd> {
        self.commands()
            .into_iter()
            .filter(|cmd| !matches!(cmd, EngineCmd::GetStatus { .. }))
            .collect()
    }

    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn interface_indexes(&self) -> Vec<u32> {
        self.interface_indexes.lock().unwrap().clone()
    }

    pub fn current_status(&self) -> Status {
        self.status.get()
    }

    fn publish(&self, vpn_status: VpnStatus) {
        self.status.publish(Status {
            version: Uuid::new_v4(),
            vpn_status,
            use_system_dns: false,
        });
    }

    pub fn publish_disconnected(&self) {
        self.publish(VpnStatus::Disconnected {});
    }

    pub fn publish_connecting(&self) {
        self.publish(VpnStatus::Connecting {
            tunnel_args: TunnelArgs::default(),
            reconnecting: false,
        });
    }

    pub fn publish_connected(&self) {
        self.publish(VpnStatus::Connected {
            tunnel_args: TunnelArgs::default(),
            exit: ExitInfo {
                id: "yyz-1".to_string(),
                country_code: "CA".to_string(),
                city_code: "yyz".to_string(),
            },
            network_config: test_network_config(),
            client_public_key: "client-pk".to_string(),
            exit_public_key: "exit-pk".to_string(),
        });
    }
}

/// The configuration the engine reports once connected
pub(crate) fn test_network_config() -> NetworkConfig {
    serde_json::from_str(
        r#"{"ipv4":"10.75.76.77","dns":["10.64.0.99"],"ipv6":"fc00:bbbb:bbbb:bb01::c:4c4d/128","mtu":1280}"#,
    )
    .unwrap()
}

impl Engine for MockEngine {
    fn json_cmd(&self, cmd: Bytes) -> BoxFuture<'static, RawCmdResult> {
        let parsed: EngineCmd = match serde_json::from_slice(&cmd) {
            Ok(parsed) => parsed,
            Err(_) => return async { Err("protocolError".to_string()) }.boxed(),
        };
        self.cmds.lock().unwrap().push(parsed.clone());

        if self.fail.load(Ordering::SeqCst) {
            return async { Err("engineUnreachable".to_string()) }.boxed();
        }

        match parsed {
            EngineCmd::GetStatus { known_version } => {
                let status = self.status.clone();
                async move {
                    let next = status
                        .wait_until(|s| Some(s.version) != known_version)
                        .await;
                    Ok(serde_json::to_string(&next).expect("status serializes"))
                }
                .boxed()
            }
            _ => async { Ok("{}".to_string()) }.boxed(),
        }
    }

    fn send_packet(&self, packet: &[u8]) {
        self.sent.lock().unwrap().push(packet.to_vec());
    }

    fn set_network_interface_index(&self, index: u32) {
        self.interface_indexes.lock().unwrap().push(index);
    }

    fn wake(&self) {}
}

/// Host double backed by an in-memory packet queue.
pub(crate) struct MockHost {
    applied: Mutex<Vec<NetworkSettings>>,
    fail_apply: AtomicBool,
    reasserting: Mutex<Vec<bool>>,
    written: Mutex<Vec<(Vec<u8>, PacketProtocol)>>,
    outbound_tx: mpsc::UnboundedSender<Vec<TunnelPacket>>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<TunnelPacket>>>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            fail_apply: AtomicBool::new(false),
            reasserting: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            outbound_tx,
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
        })
    }

    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<NetworkSettings> {
        self.applied.lock().unwrap().clone()
    }

    pub fn reasserting_events(&self) -> Vec<bool> {
        self.reasserting.lock().unwrap().clone()
    }

    pub fn written_packets(&self) -> Vec<(Vec<u8>, PacketProtocol)> {
        self.written.lock().unwrap().clone()
    }

    /// Hand one batch of outbound packets to the next queue read.
    pub fn deliver_outbound(&self, packets: Vec<Bytes>) {
        let batch = packets
            .into_iter()
            .map(|data| TunnelPacket {
                protocol: PacketProtocol::from_packet(&data),
                data,
            })
            .collect();
        let _ = self.outbound_tx.send(batch);
    }
}

impl TunnelHost for MockHost {
    fn apply_network_settings(&self, settings: NetworkSettings) -> BoxFuture<'static, Result<()>> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return async {
                Err(ProviderError::NetworkSettings("device offline".to_string()))
            }
            .boxed();
        }
        self.applied.lock().unwrap().push(settings);
        async { Ok(()) }.boxed()
    }

    fn set_reasserting(&self, reasserting: bool) {
        self.reasserting.lock().unwrap().push(reasserting);
    }

    fn read_packets(&self) -> BoxFuture<'static, Result<Vec<TunnelPacket>>> {
        let rx = self.outbound_rx.clone();
        async move {
            match rx.lock().await.recv().await {
                Some(batch) => Ok(batch),
                // Queue torn down: behave like the host, which simply never
                // calls the completion again.
                None => futures::future::pending().await,
            }
        }
        .boxed()
    }

    fn write_packet(&self, packet: Bytes, protocol: PacketProtocol) {
        self.written.lock().unwrap().push((packet.to_vec(), protocol));
    }
}
