//! Error types used by the twincom runtime.
//!
//! Everything that can go wrong at the public surface is collected into a
//! single [`ComError`] enum. Lifecycle misuse (`AlreadyRunning`, `NotRunning`)
//! and spawn failures surface as `error` events on the child handle rather
//! than as `Result`s, because supervision is event-driven; session and channel
//! problems are returned from the operations that detect them.
//!
//! [`ComError::as_label`] yields a short snake_case tag for logs.

use std::path::PathBuf;
use thiserror::Error;

/// Direction of a forbidden (reserved-name) event relative to this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDirection {
    /// The local side tried to send the event to its twin.
    Outbound,
    /// The event arrived from the twin over the channel.
    Inbound,
}

impl std::fmt::Display for EventDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDirection::Outbound => f.write_str("to the twin"),
            EventDirection::Inbound => f.write_str("from the twin"),
        }
    }
}

/// # Errors produced by the twincom runtime.
///
/// Covers lifecycle misuse, spawn failures, the reserved-event filter,
/// and RPC session faults on either side of the channel.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ComError {
    /// `start()` was called while the child process is already running.
    #[error("cannot start: child is already running")]
    AlreadyRunning,

    /// The child process could not be spawned.
    #[error("failed to spawn child {script:?}: {reason}")]
    SpawnFailure {
        /// Resolved path of the script that failed to spawn.
        script: PathBuf,
        /// Description of the underlying failure.
        reason: String,
    },

    /// `stop()`, `restart()` or `kill()` was called with no running child.
    #[error("cannot signal: child is not running")]
    NotRunning,

    /// A reserved lifecycle event name was routed toward or from the twin.
    #[error("forbidden event '{name}' {direction}")]
    ForbiddenEvent {
        /// The reserved name that was rejected.
        name: String,
        /// Which way the event was traveling.
        direction: EventDirection,
    },

    /// The local RPC session rejected a frame (malformed or unknown method).
    #[error("local session error: {0}")]
    LocalSession(String),

    /// The remote side reported a session-level error frame.
    #[error("remote session error: {0}")]
    RemoteSession(String),

    /// No message channel is available to bind an RPC session onto.
    #[error("no message channel available for RPC binding")]
    MissingChannel,
}

impl ComError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use twincom::ComError;
    ///
    /// assert_eq!(ComError::AlreadyRunning.as_label(), "already_running");
    /// assert_eq!(ComError::MissingChannel.as_label(), "missing_channel");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ComError::AlreadyRunning => "already_running",
            ComError::SpawnFailure { .. } => "spawn_failure",
            ComError::NotRunning => "not_running",
            ComError::ForbiddenEvent { .. } => "forbidden_event",
            ComError::LocalSession(_) => "local_session",
            ComError::RemoteSession(_) => "remote_session",
            ComError::MissingChannel => "missing_channel",
        }
    }
}
