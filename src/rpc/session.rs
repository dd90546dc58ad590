//! RPC session: a synchronous protocol state machine.
//!
//! A [`Session`] owns one side's view of the channel conversation. It is
//! deliberately synchronous and transport-free: callers feed it raw inbound
//! frames through [`Session::handle`] and get back a list of
//! [`SessionEvent`]s to act on; outbound emits are marshaled with
//! [`Session::outbound_emit`]. All scheduling lives in the layers above.
//!
//! Function arguments are carried by handle: the sender registers the
//! closure in an explicit table keyed by a generation-tagged id, the
//! receiver gets a [`RemoteCallback`] stub at the same argument position.
//! Invoking the stub sends a response frame; receiving the response removes
//! the closure from the table and runs it. [`HandleStats`] counts both ends
//! so leaks are observable, and [`Session::release_all`] drops whatever is
//! left at teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::events::EventArg;
use crate::rpc::wire::{MessageSink, WireMessage};

/// Response closure for an outbound emit, fired at most once.
pub type CallbackFn = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Distinguishes callback handles across session instances. Stale response
/// frames from a previous child generation can never hit a live handle.
static SESSION_GEN: AtomicU32 = AtomicU32::new(1);

/// Capabilities advertised by the remote side during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCapabilities {
    methods: Vec<String>,
}

impl RemoteCapabilities {
    pub fn has(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Counters over the callback handle table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// Handles registered for outbound emits.
    pub created: u64,
    /// Handles resolved by a response or dropped at teardown.
    pub released: u64,
}

/// Callable stub for a function argument the twin attached to an emit.
///
/// Cloneable, but fires at most once across all clones; later invocations
/// return `false` and send nothing.
#[derive(Clone, Debug)]
pub struct RemoteCallback {
    id: u64,
    fired: Arc<AtomicBool>,
    sink: MessageSink,
}

impl RemoteCallback {
    pub(crate) fn new(id: u64, sink: MessageSink) -> Self {
        Self {
            id,
            fired: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    /// Handle id, mainly useful in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sends the response frame resolving this callback on the twin.
    ///
    /// Returns `false` if the stub already fired.
    pub fn invoke(&self, args: Vec<Value>) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!(id = self.id, "remote callback invoked more than once");
            return false;
        }
        self.sink
            .send(WireMessage::callback_response(self.id, args).into_value());
        true
    }
}

/// What a handled frame asks the caller to do.
pub enum SessionEvent {
    /// The remote side completed its handshake with these capabilities.
    Remote(RemoteCapabilities),
    /// The remote side emitted an event.
    Event {
        name: String,
        args: Vec<EventArg>,
    },
    /// A callback handle was resolved; run the closure with these arguments.
    /// Returned rather than run inline so the caller can drop its locks first.
    Resolved(CallbackFn, Vec<Value>),
    /// This side could not make sense of an inbound frame.
    LocalError(String),
    /// The remote side reported a session-level error.
    RemoteError(String),
}

/// One side's session state: handshake progress and the callback table.
pub struct Session {
    generation: u32,
    next_seq: u32,
    handles: HashMap<u64, CallbackFn>,
    stats: HandleStats,
    remote: Option<RemoteCapabilities>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            generation: SESSION_GEN.fetch_add(1, Ordering::Relaxed),
            next_seq: 0,
            handles: HashMap::new(),
            stats: HandleStats::default(),
            remote: None,
        }
    }

    /// The handshake frame advertising this side's single capability.
    pub fn advertise(&self) -> Value {
        WireMessage::methods(&["emit"]).into_value()
    }

    /// Capabilities the remote side advertised, if the handshake happened.
    pub fn remote(&self) -> Option<&RemoteCapabilities> {
        self.remote.as_ref()
    }

    /// Snapshot of the callback handle counters.
    pub fn stats(&self) -> HandleStats {
        self.stats
    }

    /// Marshals an outbound emit, registering `callback` in the handle
    /// table when present.
    pub fn outbound_emit(
        &mut self,
        name: &str,
        args: &[Value],
        callback: Option<CallbackFn>,
    ) -> Value {
        let handle = callback.map(|cb| {
            self.next_seq += 1;
            let id = (u64::from(self.generation) << 32) | u64::from(self.next_seq);
            self.handles.insert(id, cb);
            self.stats.created += 1;
            id
        });
        WireMessage::emit(name, args, handle).into_value()
    }

    /// Processes one inbound frame.
    ///
    /// `reply` is where protocol-level error frames go; event dispatch and
    /// callback execution are left to the caller via the returned events.
    pub fn handle(&mut self, raw: Value, reply: &MessageSink) -> Vec<SessionEvent> {
        let msg = match WireMessage::parse(raw) {
            Ok(msg) => msg,
            Err(err) => {
                let reason = format!("unparseable frame: {err}");
                reply.send(WireMessage::error(&reason).into_value());
                return vec![SessionEvent::LocalError(reason)];
            }
        };

        if let Some(id) = msg.method.as_u64() {
            return self.handle_response(id, msg.arguments);
        }

        match msg.method.as_str() {
            Some("methods") => self.handle_methods(&msg.arguments),
            Some("emit") => self.handle_emit(msg, reply),
            Some("error") => {
                let reason = msg
                    .arguments
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                vec![SessionEvent::RemoteError(reason)]
            }
            Some(other) => {
                let reason = format!("unknown method '{other}'");
                reply.send(WireMessage::error(&reason).into_value());
                vec![SessionEvent::LocalError(reason)]
            }
            None => {
                let reason = "frame method is neither a name nor a handle id".to_string();
                reply.send(WireMessage::error(&reason).into_value());
                vec![SessionEvent::LocalError(reason)]
            }
        }
    }

    fn handle_methods(&mut self, arguments: &[Value]) -> Vec<SessionEvent> {
        let Some(caps) = arguments.first().and_then(Value::as_object) else {
            return vec![SessionEvent::LocalError(
                "methods frame without a capability object".to_string(),
            )];
        };
        let remote = RemoteCapabilities {
            methods: caps.keys().cloned().collect(),
        };
        self.remote = Some(remote.clone());
        vec![SessionEvent::Remote(remote)]
    }

    fn handle_emit(&mut self, msg: WireMessage, reply: &MessageSink) -> Vec<SessionEvent> {
        let mut arguments = msg.arguments.into_iter();
        let Some(Value::String(name)) = arguments.next() else {
            return vec![SessionEvent::LocalError(
                "emit frame without an event name".to_string(),
            )];
        };

        // Position in the original argument list → callback handle id.
        let mut positions: HashMap<usize, u64> = HashMap::new();
        for (id_text, pos) in &msg.callbacks {
            match id_text.parse::<u64>() {
                Ok(id) => {
                    positions.insert(*pos, id);
                }
                Err(_) => {
                    return vec![SessionEvent::LocalError(format!(
                        "emit frame with malformed callback id '{id_text}'"
                    ))];
                }
            }
        }

        let args = arguments
            .enumerate()
            .map(|(i, value)| match positions.get(&(i + 1)) {
                Some(&id) => EventArg::Callback(RemoteCallback::new(id, reply.clone())),
                None => EventArg::Value(value),
            })
            .collect();

        vec![SessionEvent::Event { name, args }]
    }

    fn handle_response(&mut self, id: u64, args: Vec<Value>) -> Vec<SessionEvent> {
        match self.handles.remove(&id) {
            Some(cb) => {
                self.stats.released += 1;
                vec![SessionEvent::Resolved(cb, args)]
            }
            None => {
                tracing::debug!(id, "response for unknown or released callback handle");
                Vec::new()
            }
        }
    }

    /// Drops every outstanding callback handle without firing it.
    pub fn release_all(&mut self) {
        let dropped = self.handles.len() as u64;
        self.handles.clear();
        self.stats.released += dropped;
        if dropped > 0 {
            tracing::debug!(dropped, "released unresolved callback handles at teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn capture() -> (MessageSink, Arc<Mutex<Vec<Value>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let store = frames.clone();
        let sink = MessageSink::new(move |frame| store.lock().unwrap().push(frame));
        (sink, frames)
    }

    #[test]
    fn test_handshake_yields_remote_capabilities() {
        let mut session = Session::new();
        let (reply, frames) = capture();

        let events = session.handle(
            json!({"method": "methods", "arguments": [{"emit": "[Function]"}]}),
            &reply,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Remote(caps) => {
                assert!(caps.has("emit"));
                assert!(!caps.has("shutdown"));
            }
            _ => panic!("expected Remote event"),
        }
        assert!(session.remote().is_some());
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_outbound_emit_registers_handle() {
        let mut session = Session::new();
        let frame = session.outbound_emit("child::f", &[json!(7)], Some(Box::new(|_| {})));

        assert_eq!(session.stats().created, 1);
        assert_eq!(session.stats().released, 0);

        let msg = WireMessage::parse(frame).unwrap();
        assert_eq!(msg.arguments[0], json!("child::f"));
        assert_eq!(msg.arguments[1], json!(7));
        assert_eq!(msg.callbacks.len(), 1);
        assert_eq!(msg.callbacks.values().next(), Some(&2));
    }

    #[test]
    fn test_response_resolves_handle_once() {
        let mut session = Session::new();
        let (reply, _) = capture();

        let frame = session.outbound_emit("child::f", &[], Some(Box::new(|_| {})));
        let msg = WireMessage::parse(frame).unwrap();
        let id: u64 = msg.callbacks.keys().next().unwrap().parse().unwrap();

        let events = session.handle(json!({"method": id, "arguments": ["done"]}), &reply);
        assert_eq!(events.len(), 1);
        match events.into_iter().next() {
            Some(SessionEvent::Resolved(cb, args)) => {
                assert_eq!(args, vec![json!("done")]);
                cb(args);
            }
            _ => panic!("expected Resolved event"),
        }
        assert_eq!(session.stats().released, 1);

        // A duplicate response hits an empty slot and is dropped.
        let events = session.handle(json!({"method": id, "arguments": []}), &reply);
        assert!(events.is_empty());
        assert_eq!(session.stats().released, 1);
    }

    #[test]
    fn test_inbound_emit_materializes_callback_stub() {
        let mut session = Session::new();
        let (reply, frames) = capture();

        let events = session.handle(
            json!({
                "method": "emit",
                "arguments": ["child::f", 7, "[Function]"],
                "callbacks": {"99": 2}
            }),
            &reply,
        );
        let (name, args) = match events.into_iter().next() {
            Some(SessionEvent::Event { name, args }) => (name, args),
            _ => panic!("expected Event"),
        };
        assert_eq!(name, "child::f");
        assert_eq!(args[0].as_value(), Some(&json!(7)));

        let stub = args[1].as_callback().expect("stub at callback position");
        assert!(stub.invoke(vec![json!("ok")]));
        assert!(!stub.invoke(vec![json!("again")]));

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], json!({"method": 99, "arguments": ["ok"]}));
    }

    #[test]
    fn test_unknown_method_replies_with_error_frame() {
        let mut session = Session::new();
        let (reply, frames) = capture();

        let events = session.handle(json!({"method": "shutdown", "arguments": []}), &reply);
        assert!(matches!(events[0], SessionEvent::LocalError(_)));
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_release_all_accounts_for_every_handle() {
        let mut session = Session::new();
        for _ in 0..3 {
            session.outbound_emit("child::f", &[], Some(Box::new(|_| {})));
        }
        assert_eq!(session.stats().created, 3);

        session.release_all();
        let stats = session.stats();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.released, 3);
    }

    #[test]
    fn test_generations_keep_handle_ids_distinct() {
        let mut a = Session::new();
        let mut b = Session::new();
        let fa = a.outbound_emit("e", &[], Some(Box::new(|_| {})));
        let fb = b.outbound_emit("e", &[], Some(Box::new(|_| {})));

        let ida: u64 = WireMessage::parse(fa)
            .unwrap()
            .callbacks
            .keys()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        let idb: u64 = WireMessage::parse(fb)
            .unwrap()
            .callbacks
            .keys()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_ne!(ida, idb);
    }
}
