//! `pollguard` is a resilient request engine for long polling.
//!
//! A [`RequestController`] issues a request, retries transient failures with
//! exponential backoff plus jitter, and falls back to a cross-origin-safe
//! transport when a direct one is unavailable:
//! - [`RequestController::start`]
//! - [`RequestController::retry`]
//! - [`RequestController::abort`]
//! - [`RequestController::on`] / [`RequestController::off`]

mod channel;
pub mod classify;
mod config;
mod controller;
mod decode;
mod error;
mod events;
mod fallback;
mod http;
mod request;
pub mod retry;
mod selector;
mod types;
pub mod wire;

pub use channel::{ChannelFuture, ChannelRequest, ChannelResponse, TransportChannel};
pub use classify::{classify, Classification, ErrorCodes};
pub use config::{RequestConfig, TransportMode};
pub use controller::{ControllerBuilder, RequestController};
pub use decode::parse_header_block;
pub use error::{EngineError, ErrorReason, UsageError};
pub use events::{Event, EventBus, EventKind, Subscription, SubscriptionId};
pub use fallback::{
    CallbackRegistry, FallbackChannel, PendingLoad, ScriptLoader, DEFAULT_NAMESPACE,
};
pub use http::HttpChannel;
pub use request::{LastRequest, RequestDescriptor, Target};
pub use selector::{choose_transport, Environment, TransportSelector};
pub use types::{Headers, Payload, RequestState, Transport};
pub use wire::FallbackPayload;

pub type Result<T> = std::result::Result<T, EngineError>;
