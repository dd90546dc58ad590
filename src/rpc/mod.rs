//! RPC layer: wire frames, session state machine and binding lifecycle.
//!
//! This module turns router emits into channel frames and channel frames
//! back into router deliveries.
//!
//! ## Contents
//! - [`WireMessage`], [`MessageSink`] the frame format and the outbound seam
//! - [`Session`] synchronous protocol state machine with the callback table
//! - [`RpcBinder`] lifecycle (`Starting → Ready → TornDown`) around a session
//!
//! ## Quick wiring
//! ```text
//! Router::emit ──► Session::outbound_emit ──► MessageSink ──► channel
//! channel ──► RpcBinder::handle_message ──► Session::handle ──► Router::local_emit
//! ```
//!
//! The session never blocks and never schedules; everything async lives in
//! `core::channel` (transport) and `core::supervisor` (driver task).

mod binder;
mod session;
mod wire;

pub use binder::{BindState, RpcBinder, TeardownReason};
pub use session::{CallbackFn, HandleStats, RemoteCallback, RemoteCapabilities, Session, SessionEvent};
pub use wire::{MessageSink, WireMessage};
