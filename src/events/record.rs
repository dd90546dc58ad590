//! Event payloads delivered to subscribers.
//!
//! An [`EventRecord`] is what a handler receives: the full event name plus
//! its arguments. Arguments are either plain JSON values or remote callback
//! stubs ([`EventArg::Callback`]) minted by the RPC session when the twin
//! attached a function to its emit.

use serde_json::Value;

use crate::rpc::RemoteCallback;

/// One argument of a delivered event.
#[derive(Clone, Debug)]
pub enum EventArg {
    /// A plain JSON value.
    Value(Value),
    /// A callable stub for a function argument supplied by the twin.
    Callback(RemoteCallback),
}

impl EventArg {
    /// Returns the JSON value, if this argument is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            EventArg::Value(v) => Some(v),
            EventArg::Callback(_) => None,
        }
    }

    /// Shortcut for string-typed value arguments.
    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// Returns the callback stub, if this argument is one.
    pub fn as_callback(&self) -> Option<&RemoteCallback> {
        match self {
            EventArg::Value(_) => None,
            EventArg::Callback(cb) => Some(cb),
        }
    }
}

impl From<Value> for EventArg {
    fn from(v: Value) -> Self {
        EventArg::Value(v)
    }
}

/// A delivered event: name plus arguments.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// Full namespaced event name, e.g. `child::message`.
    pub name: String,
    /// Event arguments in emit order.
    pub args: Vec<EventArg>,
}

impl EventRecord {
    /// Creates a record from a name and its arguments.
    pub fn new(name: impl Into<String>, args: Vec<EventArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Convenience constructor for records carrying only plain values.
    pub fn from_values(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(name, values.into_iter().map(EventArg::Value).collect())
    }
}
