//! Event router: subscriptions plus the local/remote emit decision.
//!
//! The [`Router`] is the hub each side of the channel owns. Subscribers
//! register handlers against `::` patterns; emitters call [`Router::emit`]
//! and the router decides what happens:
//!
//! ```text
//! emit(name, args)
//!   ├─ reserved name + ready remote ─► local `error` event only
//!   ├─ ready remote ─────────────────► one outbound frame, then local delivery
//!   └─ no remote ────────────────────► local delivery only
//! ```
//!
//! [`Router::local_emit`] bypasses the remote decision entirely; it is what
//! the runtime uses for lifecycle events and for events arriving from the
//! twin. Handlers run synchronously on the emitting call stack, and the
//! internal lock is never held while they run, so a handler may emit again
//! or tear the binding down without deadlocking.
//!
//! [`Router::ready`] defers a closure until the RPC binding reports ready;
//! if it already is, the closure runs on the next scheduler tick.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::error::{ComError, EventDirection};
use crate::events::name::{is_reserved, Pattern};
use crate::events::record::{EventArg, EventRecord};
use crate::rpc::{CallbackFn, MessageSink, Session};

type Handler = Arc<dyn Fn(&EventRecord) + Send + Sync>;
type ReadyFn = Box<dyn FnOnce() + Send>;

/// Handle to a ready remote session: where outbound frames are marshaled
/// and where they are written.
#[derive(Clone)]
pub(crate) struct RemoteLink {
    pub(crate) session: Arc<Mutex<Session>>,
    pub(crate) sink: MessageSink,
}

struct Subscription {
    id: u64,
    pattern: Pattern,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    subs: Vec<Subscription>,
    any: Vec<(u64, Handler)>,
    remote: Option<RemoteLink>,
    ready: bool,
    ready_fns: Vec<ReadyFn>,
}

/// Subscription and routing hub for one side of the channel.
///
/// Cheap to clone; all clones share the same subscription table and
/// remote link.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<Mutex<RouterInner>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes `handler` to events matching `pattern`.
    ///
    /// Returns a subscription id usable with [`Router::off`].
    pub fn on(&self, pattern: &str, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        self.subscribe(pattern, false, handler)
    }

    /// Like [`Router::on`], but the subscription is removed after its
    /// first delivery.
    pub fn once(
        &self,
        pattern: &str,
        handler: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> u64 {
        self.subscribe(pattern, true, handler)
    }

    fn subscribe(
        &self,
        pattern: &str,
        once: bool,
        handler: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> u64 {
        let mut g = self.lock();
        g.next_id += 1;
        let id = g.next_id;
        g.subs.push(Subscription {
            id,
            pattern: Pattern::parse(pattern),
            once,
            handler: Arc::new(handler),
        });
        id
    }

    /// Subscribes `handler` to every delivered event, reserved ones included.
    ///
    /// Any-handlers run before pattern handlers for the same event.
    pub fn on_any(&self, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        let mut g = self.lock();
        g.next_id += 1;
        let id = g.next_id;
        g.any.push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription. Returns `true` if it existed.
    pub fn off(&self, id: u64) -> bool {
        let mut g = self.lock();
        let before = g.subs.len() + g.any.len();
        g.subs.retain(|s| s.id != id);
        g.any.retain(|(aid, _)| *aid != id);
        before != g.subs.len() + g.any.len()
    }

    /// Runs `f` once the RPC binding is ready.
    ///
    /// If the binding is already ready, `f` runs on the next scheduler tick
    /// rather than inline; otherwise it is queued and runs right after the
    /// `rpcready` event is delivered.
    pub fn ready(&self, f: impl FnOnce() + Send + 'static) {
        let mut g = self.lock();
        if g.ready {
            drop(g);
            tokio::spawn(async move { f() });
        } else {
            g.ready_fns.push(Box::new(f));
        }
    }

    /// Whether the remote link is currently ready.
    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Emits an event: forwarded to the twin when the binding is ready,
    /// then delivered locally.
    ///
    /// Reserved names are never forwarded; with a ready binding they are
    /// swallowed and a local `error` event is raised instead.
    pub fn emit(&self, name: &str, args: Vec<Value>) {
        self.route(name, args, None);
    }

    /// Emits an event with a response callback attached as a trailing
    /// function argument on the wire.
    ///
    /// The callback fires at most once, when the twin invokes its stub.
    /// Without a ready binding the event is delivered locally and the
    /// callback is dropped unfired.
    pub fn emit_with_callback(&self, name: &str, args: Vec<Value>, callback: CallbackFn) {
        self.route(name, args, Some(callback));
    }

    fn route(&self, name: &str, args: Vec<Value>, callback: Option<CallbackFn>) {
        let link = self.lock().remote.clone();
        if let Some(link) = link {
            if is_reserved(name) {
                let err = ComError::ForbiddenEvent {
                    name: name.to_string(),
                    direction: EventDirection::Outbound,
                };
                tracing::warn!(event = name, "refusing to route reserved event");
                let mut payload = vec![
                    EventArg::Value(Value::String(err.to_string())),
                    EventArg::Value(Value::String(name.to_string())),
                ];
                payload.extend(args.into_iter().map(EventArg::Value));
                self.local_emit("error", payload);
                return;
            }
            let frame = {
                let mut session = link.session.lock().unwrap_or_else(PoisonError::into_inner);
                session.outbound_emit(name, &args, callback)
            };
            link.sink.send(frame);
        } else if callback.is_some() {
            tracing::debug!(event = name, "no remote link; dropping emit callback");
        }
        self.local_emit(name, args.into_iter().map(EventArg::Value).collect());
    }

    /// Delivers an event to local subscribers only, skipping the remote
    /// decision. Lifecycle events and inbound twin events take this path.
    pub fn local_emit(&self, name: &str, args: Vec<EventArg>) {
        let record = EventRecord::new(name, args);
        if name == "error" {
            tracing::warn!(event = name, args = ?record.args, "error event");
        } else {
            tracing::trace!(event = name, "deliver");
        }

        let (any, matched) = {
            let mut g = self.lock();
            let any: Vec<Handler> = g.any.iter().map(|(_, h)| h.clone()).collect();
            let matched: Vec<Handler> = g
                .subs
                .iter()
                .filter(|s| s.pattern.matches(name))
                .map(|s| s.handler.clone())
                .collect();
            g.subs.retain(|s| !(s.once && s.pattern.matches(name)));
            (any, matched)
        };

        for handler in any {
            handler(&record);
        }
        for handler in matched {
            handler(&record);
        }
    }

    /// Installs the remote link, flips to ready, emits `rpcready` and runs
    /// any queued ready closures.
    pub(crate) fn mark_ready(&self, link: RemoteLink) {
        let fns = {
            let mut g = self.lock();
            g.remote = Some(link);
            g.ready = true;
            std::mem::take(&mut g.ready_fns)
        };
        self.local_emit("rpcready", Vec::new());
        for f in fns {
            f();
        }
    }

    /// Drops the remote link; subsequent emits fall back to local-only.
    pub(crate) fn clear_remote(&self) {
        let mut g = self.lock();
        g.remote = None;
        g.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn recorder(router: &Router) -> Arc<StdMutex<Vec<String>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = log.clone();
        router.on_any(move |rec| sink.lock().unwrap().push(rec.name.clone()));
        log
    }

    #[test]
    fn test_local_delivery_and_wildcards() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        router.on("child::*", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        router.local_emit("child::message", vec![]);
        router.local_emit("child::quit", vec![]);
        router.local_emit("parent::message", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        router.once("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        router.local_emit("ping", vec![]);
        router.local_emit("ping", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_subscription() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = router.on("ping", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        router.local_emit("ping", vec![]);
        assert!(router.off(id));
        router.local_emit("ping", vec![]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!router.off(id));
    }

    #[test]
    fn test_emit_without_remote_is_local_only() {
        let router = Router::new();
        let log = recorder(&router);
        router.emit("child::message", vec![Value::from("hi")]);
        assert_eq!(*log.lock().unwrap(), vec!["child::message"]);
    }

    #[test]
    fn test_reserved_emit_without_remote_delivers_locally() {
        // With no remote link there is nothing to protect; reserved names
        // fall through to plain local delivery.
        let router = Router::new();
        let log = recorder(&router);
        router.emit("stop", vec![]);
        assert_eq!(*log.lock().unwrap(), vec!["stop"]);
    }

    #[test]
    fn test_remote_forward_precedes_local_delivery() {
        let router = Router::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o = order.clone();
        let sink = MessageSink::new(move |_frame| o.lock().unwrap().push("wire".to_string()));
        let o = order.clone();
        router.on("child::message", move |_| o.lock().unwrap().push("local".to_string()));

        router.mark_ready(RemoteLink {
            session: Arc::new(Mutex::new(Session::new())),
            sink,
        });
        router.emit("child::message", vec![Value::from(1)]);

        assert_eq!(*order.lock().unwrap(), vec!["wire", "local"]);
    }

    #[test]
    fn test_reserved_emit_with_remote_raises_error_only() {
        let router = Router::new();
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let f = frames.clone();
        let sink = MessageSink::new(move |frame| f.lock().unwrap().push(frame));

        let log = recorder(&router);
        router.mark_ready(RemoteLink {
            session: Arc::new(Mutex::new(Session::new())),
            sink,
        });
        router.emit("exit", vec![]);

        // Only rpcready (from mark_ready) and the error event; the reserved
        // event itself is neither forwarded nor delivered.
        assert_eq!(*log.lock().unwrap(), vec!["rpcready", "error"]);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reserved_emit_error_carries_offending_args() {
        let router = Router::new();
        let seen: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        router.on("error", move |rec| {
            *s.lock().unwrap() = rec
                .args
                .iter()
                .filter_map(|a| a.as_value().cloned())
                .collect();
        });

        router.mark_ready(RemoteLink {
            session: Arc::new(Mutex::new(Session::new())),
            sink: MessageSink::new(|_| {}),
        });
        router.emit("exit", vec![Value::from(7), Value::from("term")]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], Value::from("exit"));
        assert_eq!(seen[2..], [Value::from(7), Value::from("term")]);
    }

    #[tokio::test]
    async fn test_ready_closures_queue_until_rpcready() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        router.ready(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let sink = MessageSink::new(|_| {});
        router.mark_ready(RemoteLink {
            session: Arc::new(Mutex::new(Session::new())),
            sink,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Already ready: runs on the next tick, not inline.
        let h = hits.clone();
        router.ready(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_any_handlers_run_before_pattern_handlers() {
        let router = Router::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o = order.clone();
        router.on("ping", move |_| o.lock().unwrap().push("pattern"));
        let o = order.clone();
        router.on_any(move |_| o.lock().unwrap().push("any"));

        router.local_emit("ping", vec![]);
        assert_eq!(*order.lock().unwrap(), vec!["any", "pattern"]);
    }
}
