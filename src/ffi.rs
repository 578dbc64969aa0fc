//! C FFI surface for the host glue
//!
//! The platform extension (Swift, Kotlin, C) drives the provider through
//! these functions and supplies its side of the contract as a function
//! table. Ownership rules: a provider pointer is owned by the caller and
//! released with [`tunprov_provider_free`]; byte buffers are only valid for
//! the duration of the call they are passed to.

#![allow(clippy::missing_safety_doc)]

use crate::config::ProviderConfig;
use crate::engine::ffi::{CallbackTable, FfiBytes, FfiEngine, FfiStr, RawEngineApi};
use crate::error::ProviderError;
use crate::host::{NetworkSettings, PacketProtocol, TunnelHost, TunnelPacket};
use crate::provider::{StartOptions, StopReason, TunnelProvider};
use crate::relay;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

/// Error codes returned by C FFI functions
#[repr(C)]
pub enum TunProvError {
    Success = 0,
    InvalidConfig = 1,
    InvalidParameter = 2,
    NotInitialized = 3,
    AlreadyInitialized = 4,
    AlreadyActive = 5,
    Inactive = 6,
    EngineError = 7,
    HostError = 8,
    InternalError = 99,
}

impl From<&ProviderError> for TunProvError {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::Config(_) => TunProvError::InvalidConfig,
            ProviderError::AlreadyActive => TunProvError::AlreadyActive,
            ProviderError::Inactive => TunProvError::Inactive,
            ProviderError::Command(_) | ProviderError::EngineUnreachable(_) => {
                TunProvError::EngineError
            }
            ProviderError::NetworkSettings(_) => TunProvError::HostError,
            ProviderError::Protocol(_) | ProviderError::Json(_) => TunProvError::InvalidParameter,
            _ => TunProvError::InternalError,
        }
    }
}

lazy_static! {
    static ref RUNTIME: Runtime = Runtime::new().expect("failed to create ffi runtime");
}

static ENGINE: OnceLock<Arc<FfiEngine>> = OnceLock::new();
static CONFIG: OnceLock<ProviderConfig> = OnceLock::new();
/// Engine log-flush guard; intentionally kept alive for the process
/// lifetime.
static LOG_GUARD: AtomicUsize = AtomicUsize::new(0);

fn global_engine() -> Option<Arc<FfiEngine>> {
    ENGINE.get().cloned()
}

/// Function table the host glue supplies for reaching the OS.
///
/// All functions must be callable from any thread. `context` is an opaque
/// value passed back on every call. Completion callbacks must be invoked
/// exactly once, on any thread.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawHostApi {
    pub context: u64,
    /// Apply JSON-encoded network settings; `done` receives an empty error
    /// string on success.
    pub apply_network_settings: unsafe extern "C" fn(
        context: u64,
        settings_json: FfiStr,
        done_context: u64,
        done: extern "C" fn(done_context: u64, error: FfiStr),
    ),
    pub set_reasserting: unsafe extern "C" fn(context: u64, reasserting: bool),
    /// Read the next batch of outbound packets. The host holds `done` until
    /// packets are available; there is no cancellation.
    pub read_packets: unsafe extern "C" fn(
        context: u64,
        done_context: u64,
        done: extern "C" fn(
            done_context: u64,
            packets: *const FfiBytes,
            protocols: *const i32,
            len: usize,
        ),
    ),
    /// Queue one inbound packet, tagged with its address family.
    pub write_packet:
        unsafe extern "C" fn(context: u64, packet: FfiBytes, address_family: i32),
}

lazy_static! {
    static ref APPLY_CALLBACKS: CallbackTable<Option<String>> = CallbackTable::new();
    static ref READ_CALLBACKS: CallbackTable<Vec<TunnelPacket>> = CallbackTable::new();
}

extern "C" fn host_apply_done(done_context: u64, error: FfiStr) {
    let error = unsafe { error.to_non_empty_string() };
    APPLY_CALLBACKS.complete(done_context, error);
}

extern "C" fn host_read_done(
    done_context: u64,
    packets: *const FfiBytes,
    protocols: *const i32,
    len: usize,
) {
    // Runs on a host-owned thread; copy everything out before returning.
    let len = if packets.is_null() || protocols.is_null() {
        0
    } else {
        len
    };
    let mut batch = Vec::with_capacity(len);
    for i in 0..len {
        let (data, family) = unsafe {
            let bytes = *packets.add(i);
            (Bytes::copy_from_slice(bytes.as_slice()), *protocols.add(i))
        };
        let protocol = if family == PacketProtocol::Ipv6.address_family() {
            PacketProtocol::Ipv6
        } else {
            PacketProtocol::Ipv4
        };
        batch.push(TunnelPacket { data, protocol });
    }
    READ_CALLBACKS.complete(done_context, batch);
}

/// [`TunnelHost`] implementation over the host-supplied function table
struct FfiHost {
    api: RawHostApi,
}

impl TunnelHost for FfiHost {
    fn apply_network_settings(
        &self,
        settings: NetworkSettings,
    ) -> BoxFuture<'static, crate::error::Result<()>> {
        let api = self.api;
        async move {
            let settings_json = serde_json::to_string(&settings)?;
            let (token, rx) = APPLY_CALLBACKS.register();
            unsafe {
                (api.apply_network_settings)(
                    api.context,
                    FfiStr::from_str(&settings_json),
                    token,
                    host_apply_done,
                );
            }
            match rx.await {
                Ok(None) => Ok(()),
                Ok(Some(error)) => Err(ProviderError::NetworkSettings(error)),
                Err(_) => {
                    APPLY_CALLBACKS.discard(token);
                    Err(ProviderError::NetworkSettings(
                        "host dropped completion".to_string(),
                    ))
                }
            }
        }
        .boxed()
    }

    fn set_reasserting(&self, reasserting: bool) {
        unsafe {
            (self.api.set_reasserting)(self.api.context, reasserting);
        }
    }

    fn read_packets(&self) -> BoxFuture<'static, crate::error::Result<Vec<TunnelPacket>>> {
        let api = self.api;
        async move {
            let (token, rx) = READ_CALLBACKS.register();
            unsafe {
                (api.read_packets)(api.context, token, host_read_done);
            }
            match rx.await {
                Ok(batch) => Ok(batch),
                // The host never cancels reads; a dropped completion means
                // the queue is gone for good.
                Err(_) => {
                    READ_CALLBACKS.discard(token);
                    Err(ProviderError::Other("host packet queue gone".to_string()))
                }
            }
        }
        .boxed()
    }

    fn write_packet(&self, packet: Bytes, protocol: PacketProtocol) {
        unsafe {
            (self.api.write_packet)(
                self.api.context,
                FfiBytes::from_slice(&packet),
                protocol.address_family(),
            );
        }
    }
}

/// Borrow a provider pointer without taking ownership.
///
/// # Safety
/// `provider` must be a live pointer from [`tunprov_provider_new`].
unsafe fn provider_ref(provider: *const TunnelProvider) -> ManuallyDrop<Arc<TunnelProvider>> {
    ManuallyDrop::new(Arc::from_raw(provider))
}

/// Parse and validate a provider configuration
///
/// # Parameters
/// - `config_str`: TOML configuration string
/// - `error_msg`: Output buffer for error messages (nullable)
/// - `error_msg_len`: Size of error message buffer
///
/// # Returns
/// - 0 on success
/// - Error code on failure
#[no_mangle]
pub unsafe extern "C" fn tunprov_parse_config(
    config_str: *const c_char,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> c_int {
    if config_str.is_null() {
        return TunProvError::InvalidParameter as c_int;
    }

    let config_str = match CStr::from_ptr(config_str).to_str() {
        Ok(s) => s,
        Err(_) => return TunProvError::InvalidParameter as c_int,
    };

    match config_str.parse::<ProviderConfig>() {
        Ok(_) => TunProvError::Success as c_int,
        Err(err) => {
            if !error_msg.is_null() && error_msg_len > 0 {
                let error_str = format!("{err}");
                let error_bytes = error_str.as_bytes();
                let copy_len = std::cmp::min(error_bytes.len(), error_msg_len - 1);

                ptr::copy_nonoverlapping(
                    error_bytes.as_ptr() as *const c_char,
                    error_msg,
                    copy_len,
                );
                *error_msg.add(copy_len) = 0; // Null terminate
            }
            TunProvError::from(&err) as c_int
        }
    }
}

/// Initialize the provider layer and the engine behind it.
///
/// Must be called exactly once, before any provider is created. The engine
/// is started with the inbound-packet entry point of this library and the
/// caller's secret-persistence callback.
///
/// # Parameters
/// - `config_str`: TOML configuration string
/// - `engine_api`: function table for reaching the engine
/// - `secret_material`: persisted key material, empty if none
/// - `set_secret`: callback the engine uses to persist new key material
#[no_mangle]
pub unsafe extern "C" fn tunprov_initialize(
    config_str: *const c_char,
    engine_api: RawEngineApi,
    secret_material: FfiBytes,
    set_secret: extern "C" fn(secret: FfiBytes) -> bool,
) -> c_int {
    if config_str.is_null() {
        return TunProvError::InvalidParameter as c_int;
    }
    let config_str = match CStr::from_ptr(config_str).to_str() {
        Ok(s) => s,
        Err(_) => return TunProvError::InvalidParameter as c_int,
    };
    let config = match config_str.parse::<ProviderConfig>() {
        Ok(config) => config,
        Err(err) => {
            log::error!("initialize rejected config: {err}");
            return TunProvError::from(&err) as c_int;
        }
    };

    if ENGINE.get().is_some() {
        log::error!("tunprov_initialize called twice");
        return TunProvError::AlreadyInitialized as c_int;
    }

    let engine = Arc::new(FfiEngine::new(engine_api));
    let log_guard = engine.initialize(
        &config.config_dir,
        &config.user_agent,
        secret_material.as_slice(),
        tunprov_receive_packet,
        set_secret,
    );
    LOG_GUARD.store(log_guard as usize, Ordering::SeqCst);

    log::info!("provider layer initialized, user agent {}", config.user_agent);
    let _ = CONFIG.set(config);
    let _ = ENGINE.set(engine);
    TunProvError::Success as c_int
}

/// Inbound packet entry point handed to the engine at initialization.
///
/// Called on an engine-owned thread with a buffer valid only for the
/// duration of the call.
#[no_mangle]
pub extern "C" fn tunprov_receive_packet(packet: FfiBytes) {
    relay::receive_packet(unsafe { packet.as_slice() });
}

/// Create a provider instance bound to the host function table.
///
/// # Returns
/// - Opaque provider pointer on success, released with
///   [`tunprov_provider_free`]
/// - NULL if the layer is not initialized
#[no_mangle]
pub unsafe extern "C" fn tunprov_provider_new(host_api: RawHostApi) -> *mut TunnelProvider {
    let (Some(engine), Some(config)) = (global_engine(), CONFIG.get()) else {
        log::error!("tunprov_provider_new before tunprov_initialize");
        return ptr::null_mut();
    };

    let host: Arc<dyn TunnelHost> = Arc::new(FfiHost { api: host_api });
    let _runtime = RUNTIME.enter();
    let provider = TunnelProvider::new(config.clone(), engine, host);
    Arc::into_raw(provider) as *mut TunnelProvider
}

/// Release a provider instance.
///
/// In production builds this is a terminal transition: dropping the last
/// reference tears the process down, because the host framework will not
/// deliver further callbacks to this instance anyway.
#[no_mangle]
pub unsafe extern "C" fn tunprov_provider_free(provider: *mut TunnelProvider) {
    if provider.is_null() {
        return;
    }
    drop(Arc::from_raw(provider));
}

/// Start the tunnel.
///
/// `tunnel_args_json` is the engine-defined selector, empty for defaults.
/// `done` is invoked exactly once with 0 or an error code.
#[no_mangle]
pub unsafe extern "C" fn tunprov_start(
    provider: *const TunnelProvider,
    tunnel_args_json: FfiStr,
    dont_start_tunnel: bool,
    done_context: u64,
    done: extern "C" fn(done_context: u64, error: c_int),
) {
    if provider.is_null() {
        done(done_context, TunProvError::InvalidParameter as c_int);
        return;
    }
    let provider = (*provider_ref(provider)).clone();
    let options = StartOptions {
        tunnel_args: tunnel_args_json.to_non_empty_string(),
        dont_start_tunnel,
    };
    RUNTIME.spawn(async move {
        let code = match provider.start(options).await {
            Ok(()) => TunProvError::Success as c_int,
            Err(err) => {
                log::error!("start failed: {err}");
                TunProvError::from(&err) as c_int
            }
        };
        done(done_context, code);
    });
}

/// Stop the tunnel. Never fails; `done` is invoked exactly once.
///
/// In production builds the process exits once teardown completes; `done`
/// may therefore never be observed by the caller.
#[no_mangle]
pub unsafe extern "C" fn tunprov_stop(
    provider: *const TunnelProvider,
    reason: i32,
    done_context: u64,
    done: extern "C" fn(done_context: u64),
) {
    if provider.is_null() {
        done(done_context);
        return;
    }
    let provider = (*provider_ref(provider)).clone();
    RUNTIME.spawn(async move {
        provider.stop(StopReason::from_raw(reason)).await;
        done(done_context);
    });
}

/// Handle one app message; `done` is invoked exactly once with the
/// JSON-encoded response.
#[no_mangle]
pub unsafe extern "C" fn tunprov_handle_app_message(
    provider: *const TunnelProvider,
    msg: FfiBytes,
    done_context: u64,
    done: extern "C" fn(done_context: u64, response: FfiBytes),
) {
    if provider.is_null() {
        let response = crate::engine::commands::CmdResult::Error("other".to_string()).encode();
        done(done_context, FfiBytes::from_slice(&response));
        return;
    }
    let provider = (*provider_ref(provider)).clone();
    let msg = msg.as_slice().to_vec();
    RUNTIME.spawn(async move {
        let response = provider.handle_app_message(&msg).await;
        done(done_context, FfiBytes::from_slice(&response));
    });
}

#[no_mangle]
pub unsafe extern "C" fn tunprov_sleep(provider: *const TunnelProvider) {
    if provider.is_null() {
        return;
    }
    provider_ref(provider).sleep();
}

#[no_mangle]
pub unsafe extern "C" fn tunprov_wake(provider: *const TunnelProvider) {
    if provider.is_null() {
        return;
    }
    provider_ref(provider).wake();
}

/// Notify the provider of a host protocol-configuration change.
#[no_mangle]
pub unsafe extern "C" fn tunprov_protocol_configuration_change(
    provider: *const TunnelProvider,
    old_include_all_networks: bool,
    new_include_all_networks: bool,
) {
    if provider.is_null() {
        return;
    }
    let provider = (*provider_ref(provider)).clone();
    RUNTIME.spawn(async move {
        provider
            .protocol_configuration_change(old_include_all_networks, new_include_all_networks)
            .await;
    });
}

/// Hint the preferred egress interface to the engine; 0 clears the hint.
#[no_mangle]
pub extern "C" fn tunprov_set_network_interface_index(index: u32) {
    match global_engine() {
        Some(engine) => {
            use crate::engine::Engine as _;
            engine.set_network_interface_index(index);
        }
        None => log::error!("interface index hint before initialization"),
    }
}
