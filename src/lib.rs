//! # twincom
//!
//! **Twincom** is a supervised twin-process event bus for Rust.
//!
//! A parent process spawns a child with a private message channel, both
//! sides exchange namespaced events through an RPC session bound to that
//! channel, and the parent supervises the child's lifecycle with a
//! restart/spin policy. The crate is designed as a building block for
//! worker managers and long-lived helper processes.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   parent process                              child process
//! ┌───────────────────────────────┐          ┌─────────────────────────────┐
//! │ Child (handle)                │          │ Twin (handle)               │
//! │   ├─ Router  on/emit/ready    │          │   ├─ Router  on/emit/ready  │
//! │   ├─ RpcBinder ── Session     │          │   ├─ RpcBinder ── Session   │
//! │   └─ driver task              │          │   └─ driver task            │
//! │        ▲                      │          │        ▲                    │
//! │        │ ChannelEvent queue   │          │        │ ChannelEvent queue │
//! │   Spawner / OsSpawner         │          │   inherited channel         │
//! │   ├─ tokio::process child ────┼── fork ──┼─► attach via TWINCOM_CHANNEL│
//! │   ├─ unix socket listener ◄───┼── JSON ──┼─► unix socket stream        │
//! │   └─ stdout/stderr pumps      │  frames  │                             │
//! └───────────────────────────────┘          └─────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! create(script, config) ──► Child::start()
//!
//! start:
//!   ├─► spawn child + channel          (Spawner)
//!   ├─► bind RPC session               (handshake: methods { emit })
//!   ├─► emit start { data }
//!   └─► drive event queue:
//!         frames  ─► Session ─► Router (namespaced events, callbacks)
//!         stdio   ─► stdout / stderr events
//!         exit    ─► decide(policy, flags, spinning, times)
//!                      ├─ Terminate    ─► exit, close
//!                      ├─ RestartAfter ─► sleep(spin_sleep), restart
//!                      └─ Restart      ─► restart next tick
//! ```
//!
//! Reserved lifecycle names (`start`, `stop`, `exit`, `rpcready`, ... see
//! [`RESERVED_EVENTS`]) never cross the channel: emitting one with a live
//! binding raises a local `error` event instead, and frames carrying one
//! are rejected on arrival.
//!
//! ## Features
//! | Area            | Description                                              | Key types / fns                          |
//! |-----------------|----------------------------------------------------------|------------------------------------------|
//! | **Supervision** | Spawn, monitor and restart one child process.            | [`create`], [`Child`], [`ChildConfig`]   |
//! | **Events**      | Namespaced pub/sub with `*` patterns on both sides.      | [`Router`], [`EventRecord`], [`EventArg`]|
//! | **RPC**         | Channel handshake, emits, at-most-once callbacks.        | [`RpcBinder`], [`RemoteCallback`]        |
//! | **Policies**    | Restart budget and spin dampening as a pure decision.    | [`RestartPolicy`], [`decide`]            |
//! | **Child side**  | Explicit attachment to the inherited channel.            | [`Twin`]                                 |
//! | **Errors**      | Typed errors with stable snake_case labels.              | [`ComError`]                             |
//!
//! ## Example
//! ```no_run
//! use serde_json::json;
//! use twincom::{create, ChildConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut config = ChildConfig::default();
//!     config.max = Some(3);
//!
//!     let child = create("./worker", config);
//!     child.on("child::message", |rec| {
//!         println!("child says: {:?}", rec.args);
//!     });
//!     child.ready({
//!         let child = child.clone();
//!         move || child.emit("parent::hello", vec![json!("hi there")])
//!     });
//!     child.start();
//!     // ... drive your application; call child.stop() to end it
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod policies;
mod rpc;

// ---- Public re-exports ----

pub use config::ChildConfig;
pub use error::{ComError, EventDirection};
pub use events::{is_reserved, EventArg, EventRecord, Pattern, Router, RESERVED_EVENTS};
pub use policies::{decide, ExitAction, ExitFlags, RestartPolicy};
pub use rpc::{
    BindState, CallbackFn, HandleStats, MessageSink, RemoteCallback, RpcBinder, TeardownReason,
    WireMessage,
};
pub use self::core::{
    Child, ChildData, ChannelEvent, ChannelProcess, SpawnRequest, Spawned, Spawner, CHANNEL_ENV,
};

#[cfg(unix)]
pub use self::core::{create, OsSpawner};

// The child side rides on unix sockets; the supervisor seam above stays
// portable for scripted transports.
#[cfg(unix)]
mod twin;
#[cfg(unix)]
pub use twin::Twin;
