//! Runtime core: channel transport and child supervision.
//!
//! This module contains the parent-side runtime. The public API is
//! [`create`]/[`Child`] plus the [`Spawner`] seam the tests script against.
//!
//! Internal modules:
//! - [`channel`]: spawning, the unix-socket message channel, stdio capture;
//! - [`supervisor`]: the child handle, the driver task and the exit decision.

pub(crate) mod channel;
mod supervisor;

pub use channel::{ChannelEvent, ChannelProcess, SpawnRequest, Spawned, Spawner, CHANNEL_ENV};
pub use supervisor::{Child, ChildData};

#[cfg(unix)]
pub use channel::OsSpawner;
#[cfg(unix)]
pub use supervisor::create;
