//! RPC binder: lifecycle around a session.
//!
//! The [`RpcBinder`] wires a [`Session`] to a [`Router`] and a channel
//! sink, and tracks the binding lifecycle:
//!
//! ```text
//! Unbound ──bind()──► Starting ──handshake──► Ready ──teardown()──► TornDown
//!                        │                                 ▲
//!                        └──────── teardown() ─────────────┘
//! ```
//!
//! `bind` sends this side's handshake immediately. The binding flips to
//! `Ready` only when the remote handshake advertises an `emit` capability;
//! at that point the router gets its remote link and `rpcready` fires.
//!
//! Teardown is idempotent. It releases every outstanding callback handle,
//! detaches the router's remote link, and emits `rpcexit`; when torn down by
//! an explicit disconnect it emits `disconnected` as well. Frames arriving
//! after teardown are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::core::ChannelProcess;
use crate::error::{ComError, EventDirection};
use crate::events::{is_reserved, EventArg, RemoteLink, Router};
use crate::rpc::session::{HandleStats, Session, SessionEvent};
use crate::rpc::wire::MessageSink;

/// Lifecycle state of the RPC binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindState {
    /// No session exists yet.
    Unbound,
    /// Our handshake is out; waiting for the remote one.
    Starting,
    /// Both handshakes done; events flow.
    Ready,
    /// The binding ended; late frames are dropped.
    TornDown,
}

/// Why a binding was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The child process exited.
    Exit,
    /// The channel was disconnected deliberately.
    Disconnect,
}

struct BinderInner {
    state: BindState,
    session: Option<Arc<Mutex<Session>>>,
    sink: MessageSink,
}

/// Binds an RPC session to a router and a channel sink.
///
/// Cheap to clone; all clones share the binding state.
#[derive(Clone)]
pub struct RpcBinder {
    inner: Arc<Mutex<BinderInner>>,
    router: Router,
}

impl fmt::Debug for RpcBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcBinder")
            .field("state", &self.state())
            .finish()
    }
}

impl RpcBinder {
    /// Starts a binding over `sink` and sends this side's handshake.
    ///
    /// Fails with [`ComError::MissingChannel`] when no sink is available,
    /// which happens when the process has no inherited channel.
    pub fn bind(router: Router, sink: Option<MessageSink>) -> Result<Self, ComError> {
        let sink = sink.ok_or(ComError::MissingChannel)?;
        let session = Session::new();
        let handshake = session.advertise();

        let binder = Self {
            inner: Arc::new(Mutex::new(BinderInner {
                state: BindState::Starting,
                session: Some(Arc::new(Mutex::new(session))),
                sink: sink.clone(),
            })),
            router,
        };
        sink.send(handshake);
        Ok(binder)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BindState {
        self.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BindState::Ready
    }

    /// Callback handle counters, while the session is alive.
    pub fn stats(&self) -> Option<HandleStats> {
        let session = self.lock().session.clone()?;
        let stats = session.lock().unwrap_or_else(PoisonError::into_inner).stats();
        Some(stats)
    }

    /// Feeds one raw channel message through the session and acts on the
    /// resulting events. Dropped silently after teardown.
    pub fn handle_message(&self, raw: Value) {
        let (session, sink) = {
            let g = self.lock();
            match &g.session {
                Some(session) => (session.clone(), g.sink.clone()),
                None => {
                    tracing::debug!("dropping channel message after teardown");
                    return;
                }
            }
        };

        let events = {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            session.handle(raw, &sink)
        };

        for event in events {
            match event {
                SessionEvent::Remote(caps) => {
                    if !caps.has("emit") {
                        self.emit_error("remote session advertises no emit capability");
                        continue;
                    }
                    self.lock().state = BindState::Ready;
                    self.router.mark_ready(RemoteLink {
                        session: session.clone(),
                        sink: sink.clone(),
                    });
                }
                SessionEvent::Event { name, args } => {
                    if is_reserved(&name) {
                        let err = ComError::ForbiddenEvent {
                            name: name.clone(),
                            direction: EventDirection::Inbound,
                        };
                        tracing::warn!(event = %name, "rejecting reserved event from twin");
                        let mut payload = vec![
                            EventArg::Value(Value::String(err.to_string())),
                            EventArg::Value(Value::String(name)),
                        ];
                        payload.extend(args);
                        self.router.local_emit("error", payload);
                    } else {
                        self.router.local_emit(&name, args);
                    }
                }
                SessionEvent::Resolved(cb, args) => cb(args),
                SessionEvent::LocalError(reason) => {
                    self.emit_error(&ComError::LocalSession(reason).to_string());
                }
                SessionEvent::RemoteError(reason) => {
                    self.emit_error(&ComError::RemoteSession(reason).to_string());
                }
            }
        }
    }

    fn emit_error(&self, message: &str) {
        self.router
            .local_emit("error", vec![EventArg::Value(Value::String(message.to_string()))]);
    }

    /// Runs the deliberate disconnect sequence: announces the intention,
    /// closes the channel when the binding is ready, and tears down.
    pub fn disconnect(&self, channel: &dyn ChannelProcess) {
        self.router.local_emit("disconnect", Vec::new());
        if self.is_ready() {
            channel.disconnect();
            self.teardown(TeardownReason::Disconnect);
        }
    }

    /// Ends the binding. Safe to call more than once; only the first call
    /// has any effect.
    pub fn teardown(&self, reason: TeardownReason) {
        let session = {
            let mut g = self.lock();
            if g.state == BindState::TornDown {
                return;
            }
            g.state = BindState::TornDown;
            g.session.take()
        };
        if let Some(session) = session {
            session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release_all();
        }
        self.router.clear_remote();
        self.router.local_emit("rpcexit", Vec::new());
        if reason == TeardownReason::Disconnect {
            self.router.local_emit("disconnected", Vec::new());
        }
    }
}
