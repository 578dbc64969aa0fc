//! Status sync loop
//!
//! Long-polls the engine for status snapshots for the lifetime of the
//! provider instance and dispatches each one to the controller. The loop
//! holds only a weak reference to the provider: it must never keep a
//! superseded instance alive, and it exits when the instance goes away.

use crate::engine::commands::{EngineCmd, Status};
use crate::engine::{run_cmd, Engine};
use crate::provider::{ProviderId, TunnelProvider};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Spawn the status loop for `provider`.
pub(crate) fn spawn_status_loop(provider: &Arc<TunnelProvider>) {
    let weak = Arc::downgrade(provider);
    let engine = provider.engine();
    let retry = provider.config().status_retry_interval();
    tokio::spawn(async move {
        let task_id = ProviderId::generate();
        log::info!("status loop entry {task_id}");

        let mut known_version: Option<Uuid> = None;
        loop {
            let status = next_status(&*engine, known_version, retry).await;
            known_version = Some(status.version);
            let Some(provider) = weak.upgrade() else {
                log::error!("status loop for dropped provider exiting {task_id}");
                break;
            };
            provider.process_status_update(status).await;
        }
        log::info!("status loop exit {task_id}");
    });
}

/// Fetch the next status snapshot, retrying forever.
///
/// The engine holds the request open until a status newer than
/// `known_version` exists. FFI-level errors are logged and retried after a
/// fixed backoff; the loop must never die while the instance is alive.
async fn next_status(
    engine: &dyn Engine,
    known_version: Option<Uuid>,
    retry: Duration,
) -> Status {
    loop {
        match run_cmd(engine, &EngineCmd::GetStatus { known_version }).await {
            Ok(status) => return status,
            Err(e) => log::error!("error getting engine status: {e}"),
        }
        tokio::time::sleep(retry).await;
    }
}
