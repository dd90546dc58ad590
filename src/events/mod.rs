//! Event model: names, payloads and the router.
//!
//! This module groups the event **data model** and the **router** through
//! which both sides of the channel emit and subscribe.
//!
//! ## Contents
//! - [`RESERVED_EVENTS`], [`is_reserved`], [`Pattern`] names and matching
//! - [`EventRecord`], [`EventArg`] what a handler receives
//! - [`Router`] subscriptions plus the local/remote emit decision
//!
//! ## Quick reference
//! - **Publishers**: user code via `emit`/`emit_with_callback`; the runtime
//!   via `local_emit` (lifecycle events, inbound twin events).
//! - **Consumers**: handlers registered with `on`/`once`/`on_any`.
//!
//! See `rpc/mod.rs` for how emits become wire frames.

mod name;
mod record;
mod router;

pub use name::{is_reserved, Pattern, RESERVED_EVENTS};
pub use record::{EventArg, EventRecord};
pub use router::Router;

pub(crate) use router::RemoteLink;
