//! FFI plumbing for the engine boundary
//!
//! The embedder hands over a [`RawEngineApi`] function table at
//! initialization; [`FfiEngine`] adapts it to the [`Engine`](super::Engine)
//! trait. One-shot completion callbacks crossing the boundary are tracked in
//! an explicit token table rather than as reference-counted closures, so
//! every callback is invoked at most once and can be disposed of explicitly.

#![allow(clippy::missing_safety_doc)]

use super::{Engine, RawCmdResult};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Borrowed byte buffer crossing the FFI boundary.
///
/// The pointee is only valid for the duration of the call it is passed to;
/// both sides copy before returning.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiBytes {
    pub buffer: *const u8,
    pub len: usize,
}

/// Borrowed UTF-8 string crossing the FFI boundary
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiStr {
    pub bytes: FfiBytes,
}

impl FfiBytes {
    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            buffer: slice.as_ptr(),
            len: slice.len(),
        }
    }

    /// # Safety
    /// `buffer` must point to `len` readable bytes, or be null with any len.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.buffer.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.buffer, self.len)
        }
    }
}

impl FfiStr {
    pub fn from_str(s: &str) -> Self {
        Self {
            bytes: FfiBytes::from_slice(s.as_bytes()),
        }
    }

    /// # Safety
    /// Same requirements as [`FfiBytes::as_slice`].
    pub unsafe fn to_string(&self) -> String {
        String::from_utf8_lossy(self.bytes.as_slice()).into_owned()
    }

    /// # Safety
    /// Same requirements as [`FfiBytes::as_slice`].
    pub unsafe fn to_non_empty_string(&self) -> Option<String> {
        let s = self.to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }
}

/// Function table the embedder supplies for reaching the engine.
///
/// All functions must be callable from any thread. `json_cmd` and
/// `initialize` must copy their byte arguments before returning.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEngineApi {
    /// One-time engine startup. Returns an opaque log-flush guard that must
    /// stay alive for the process lifetime.
    pub initialize: unsafe extern "C" fn(
        config_dir: FfiStr,
        user_agent: FfiStr,
        secret_material: FfiBytes,
        receive_packet: extern "C" fn(packet: FfiBytes),
        set_secret: extern "C" fn(secret: FfiBytes) -> bool,
    ) -> *mut c_void,
    /// Generic command/response. `done` is invoked exactly once, on any
    /// thread, with either a non-empty ok JSON or a non-empty error code.
    pub json_cmd: unsafe extern "C" fn(
        context: u64,
        cmd: FfiBytes,
        done: extern "C" fn(context: u64, ok_json: FfiStr, error: FfiStr),
    ),
    pub send_packet: unsafe extern "C" fn(packet: FfiBytes),
    pub set_network_interface_index: unsafe extern "C" fn(index: u32),
    pub wake: unsafe extern "C" fn(),
}

/// Token table mapping in-flight FFI callbacks to their waiters.
///
/// Tokens are minted per call and redeemed at most once; redeeming or
/// discarding a token removes it, so a late or duplicate invocation is a
/// logged no-op instead of a double resume.
pub(crate) struct CallbackTable<T> {
    pending: Mutex<HashMap<u64, oneshot::Sender<T>>>,
    next_token: AtomicU64,
}

impl<T> CallbackTable<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn register(&self) -> (u64, oneshot::Receiver<T>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(token, tx);
        (token, rx)
    }

    /// Resolve the waiter for `token`. Returns false if the token was
    /// already redeemed or discarded.
    pub fn complete(&self, token: u64, value: T) -> bool {
        let sender = self.pending.lock().unwrap().remove(&token);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                log::warn!("FFI callback for unknown or already-completed token {token}");
                false
            }
        }
    }

    /// Drop the waiter for `token` without resolving it.
    pub fn discard(&self, token: u64) {
        self.pending.lock().unwrap().remove(&token);
    }
}

lazy_static! {
    static ref CMD_CALLBACKS: CallbackTable<RawCmdResult> = CallbackTable::new();
}

extern "C" fn cmd_done(context: u64, ok_json: FfiStr, error: FfiStr) {
    // Runs on an engine-owned thread; copy out before touching the table.
    let reply = unsafe {
        match error.to_non_empty_string() {
            Some(code) => Err(code),
            None => Ok(ok_json.to_string()),
        }
    };
    CMD_CALLBACKS.complete(context, reply);
}

/// [`Engine`] implementation over the embedder-supplied function table
pub struct FfiEngine {
    api: RawEngineApi,
}

impl FfiEngine {
    pub fn new(api: RawEngineApi) -> Self {
        Self { api }
    }

    /// Start the engine. Must be called exactly once, before any command.
    ///
    /// Returns the engine's opaque log-flush guard.
    pub fn initialize(
        &self,
        config_dir: &str,
        user_agent: &str,
        secret_material: &[u8],
        receive_packet: extern "C" fn(packet: FfiBytes),
        set_secret: extern "C" fn(secret: FfiBytes) -> bool,
    ) -> *mut c_void {
        unsafe {
            (self.api.initialize)(
                FfiStr::from_str(config_dir),
                FfiStr::from_str(user_agent),
                FfiBytes::from_slice(secret_material),
                receive_packet,
                set_secret,
            )
        }
    }
}

impl Engine for FfiEngine {
    fn json_cmd(&self, cmd: Bytes) -> BoxFuture<'static, RawCmdResult> {
        let api = self.api;
        async move {
            let (token, rx) = CMD_CALLBACKS.register();
            unsafe {
                (api.json_cmd)(token, FfiBytes::from_slice(&cmd), cmd_done);
            }
            match rx.await {
                Ok(reply) => reply,
                Err(_) => {
                    CMD_CALLBACKS.discard(token);
                    Err("engineUnreachable".to_string())
                }
            }
        }
        .boxed()
    }

    fn send_packet(&self, packet: &[u8]) {
        unsafe {
            (self.api.send_packet)(FfiBytes::from_slice(packet));
        }
    }

    fn set_network_interface_index(&self, index: u32) {
        unsafe {
            (self.api.set_network_interface_index)(index);
        }
    }

    fn wake(&self) {
        unsafe {
            (self.api.wake)();
        }
    }
}
