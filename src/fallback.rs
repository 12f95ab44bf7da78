//! Cross-origin fallback channel.
//!
//! An attempt is tunnelled through a script element whose URL carries the
//! request. The remote end replies by invoking a callback that the channel
//! registered under a unique id in a [`CallbackRegistry`]. Injecting and
//! removing the element is delegated to a [`ScriptLoader`].

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::oneshot;

use crate::{
    wire::{fallback_url, FallbackPayload},
    ChannelFuture, ChannelRequest, ChannelResponse, EngineError, Result, TransportChannel,
};

/// Namespace under which the registry is exposed to delivered scripts.
pub const DEFAULT_NAMESPACE: &str = "5C1E7A0B-93D4-4F6E-A2B8-6D0F3C9E1A47";

/// A script element the loader is asked to inject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingLoad {
    /// Registry id the remote end must deliver to.
    pub callback_id: String,
    /// Id of the injected element, used for removal.
    pub element_id: String,
    /// Full script URL.
    pub src: String,
}

/// Injects and removes script elements in the hosting document.
pub trait ScriptLoader: Send + Sync {
    fn inject(&self, load: &PendingLoad);
    fn remove(&self, element_id: &str);
}

/// Process-wide table of outstanding fallback callbacks.
///
/// Shared by every fallback channel of a page; ids never repeat for the
/// lifetime of the registry.
pub struct CallbackRegistry {
    namespace: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<FallbackPayload>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Script expression that resolves to the callback for `callback_id`.
    pub fn callback_expression(&self, callback_id: &str) -> String {
        format!(
            "window[\"{}\"].deliver(\"{}\")",
            self.namespace, callback_id
        )
    }

    /// Hands `payload` to the attempt waiting on `callback_id`.
    ///
    /// Returns `false` when no attempt is waiting (already completed or
    /// aborted).
    pub fn deliver(&self, callback_id: &str, payload: FallbackPayload) -> bool {
        let sender = self.lock().remove(callback_id);
        match sender {
            Some(sender) => {
                let delivered = sender.send(payload).is_ok();
                if !delivered {
                    tracing::info!(callback_id, "fallback attempt went away before delivery");
                }
                delivered
            }
            None => {
                tracing::info!(callback_id, "no callback with id");
                false
            }
        }
    }

    /// Decodes a JSON payload and delivers it.
    pub fn deliver_json(&self, callback_id: &str, json: &str) -> Result<bool> {
        let payload: FallbackPayload = serde_json::from_str(json).map_err(|err| {
            tracing::warn!(callback_id, error = %err, "malformed fallback delivery");
            EngineError::Decode(format!("invalid fallback payload: {err}"))
        })?;
        Ok(self.deliver(callback_id, payload))
    }

    /// Number of attempts waiting for delivery.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn allocate(&self) -> (String, String) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        (format!("cb-{n}"), format!("pollguard-fallback-{n}"))
    }

    fn register(&self, callback_id: String, sender: oneshot::Sender<FallbackPayload>) {
        self.lock().insert(callback_id, sender);
    }

    fn unregister(&self, callback_id: &str) -> bool {
        self.lock().remove(callback_id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<FallbackPayload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("namespace", &self.namespace)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Fallback channel bound to a registry and a loader.
#[derive(Clone)]
pub struct FallbackChannel {
    registry: Arc<CallbackRegistry>,
    loader: Arc<dyn ScriptLoader>,
}

impl FallbackChannel {
    pub fn new(registry: Arc<CallbackRegistry>, loader: Arc<dyn ScriptLoader>) -> Self {
        Self { registry, loader }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }
}

impl fmt::Debug for FallbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChannel")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TransportChannel for FallbackChannel {
    fn open(&self, request: ChannelRequest) -> ChannelFuture {
        Box::pin(attempt(
            Arc::clone(&self.registry),
            Arc::clone(&self.loader),
            request,
        ))
    }
}

/// Unregisters the callback and removes the element when an attempt ends,
/// including when its future is dropped.
struct Cleanup {
    registry: Arc<CallbackRegistry>,
    loader: Arc<dyn ScriptLoader>,
    callback_id: String,
    element_id: String,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        tracing::debug!(callback_id = %self.callback_id, "fallback cleanup");
        self.registry.unregister(&self.callback_id);
        self.loader.remove(&self.element_id);
    }
}

async fn attempt(
    registry: Arc<CallbackRegistry>,
    loader: Arc<dyn ScriptLoader>,
    request: ChannelRequest,
) -> ChannelResponse {
    let (callback_id, element_id) = registry.allocate();
    let src = match fallback_url(&request, &registry.callback_expression(&callback_id)) {
        Ok(src) => src,
        Err(err) => {
            tracing::warn!(url = %request.url, error = %err, "fallback url not buildable");
            return ChannelResponse::failed();
        }
    };

    let (sender, receiver) = oneshot::channel();
    registry.register(callback_id.clone(), sender);

    let load = PendingLoad {
        callback_id: callback_id.clone(),
        element_id: element_id.clone(),
        src,
    };
    let _cleanup = Cleanup {
        registry: Arc::clone(&registry),
        loader: Arc::clone(&loader),
        callback_id,
        element_id,
    };

    tracing::debug!(callback_id = %load.callback_id, src = %load.src, "fallback start");
    loader.inject(&load);

    match receiver.await {
        Ok(payload) => {
            tracing::debug!(callback_id = %load.callback_id, "fallback finished");
            payload.into()
        }
        Err(_) => ChannelResponse::failed(),
    }
}
