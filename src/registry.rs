//! Process-wide registry of the current provider instance
//!
//! The host framework is known to keep superseded provider instances alive,
//! and its packet callbacks cannot be unregistered. Stale closures therefore
//! detect supersession by comparing instance identifiers against this
//! registry instead of assuming a singleton.

use crate::provider::{ProviderId, TunnelProvider};
use lazy_static::lazy_static;
use std::sync::{Arc, RwLock, Weak};

lazy_static! {
    static ref CURRENT: RwLock<Option<(ProviderId, Weak<TunnelProvider>)>> = RwLock::new(None);
}

/// Make `provider` the current instance.
///
/// Only a weak reference is kept; the host framework owns the provider's
/// lifetime. Superseding a still-live instance is a host bug worth logging.
pub(crate) fn register(provider: &Arc<TunnelProvider>) {
    let mut current = CURRENT.write().unwrap();
    if let Some((other_id, other)) = current.as_ref() {
        if other.strong_count() > 0 {
            log::warn!(
                "multiple live provider instances: me {} other {}",
                provider.id(),
                other_id
            );
        }
    }
    *current = Some((provider.id().clone(), Arc::downgrade(provider)));
}

/// The current live provider, if any
pub(crate) fn current() -> Option<Arc<TunnelProvider>> {
    CURRENT.read().unwrap().as_ref().and_then(|(_, weak)| weak.upgrade())
}

/// Whether `id` identifies the current instance
pub(crate) fn is_current(id: &ProviderId) -> bool {
    CURRENT
        .read()
        .unwrap()
        .as_ref()
        .is_some_and(|(current_id, _)| current_id == id)
}
