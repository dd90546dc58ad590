//! Wire frames for the channel RPC protocol.
//!
//! Every message on the channel is one JSON object, newline-framed on the
//! real transport:
//!
//! ```text
//! {"method":"methods","arguments":[{"emit":"[Function]"}]}      handshake
//! {"method":"emit","arguments":["child::f",7],"callbacks":{"42":2}}
//! {"method":42,"arguments":["done"]}                            callback response
//! {"method":"error","arguments":["reason"]}                     session error
//! ```
//!
//! `callbacks` maps a callback handle id to the position in `arguments`
//! where the function argument sat; the receiver materializes a stub there.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Where outbound frames go. Wraps the transport's send side so the
/// session layer stays transport-agnostic.
#[derive(Clone)]
pub struct MessageSink(Arc<dyn Fn(Value) + Send + Sync>);

impl MessageSink {
    pub fn new(send: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(send))
    }

    /// Hands one frame to the transport. Never blocks; a closed transport
    /// drops the frame.
    pub fn send(&self, frame: Value) {
        (self.0)(frame);
    }
}

impl fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageSink")
    }
}

/// One frame of the session protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// `"methods"`, `"emit"`, `"error"`, or a numeric callback handle id.
    pub method: Value,
    /// Positional arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Callback handle id → position in `arguments`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callbacks: BTreeMap<String, usize>,
}

impl WireMessage {
    /// Handshake frame advertising this side's capabilities.
    pub fn methods(capabilities: &[&str]) -> Self {
        let mut caps = serde_json::Map::new();
        for name in capabilities {
            caps.insert((*name).to_string(), Value::String("[Function]".into()));
        }
        Self {
            method: Value::String("methods".into()),
            arguments: vec![Value::Object(caps)],
            callbacks: BTreeMap::new(),
        }
    }

    /// An `emit` frame carrying an event and its value arguments, with an
    /// optional callback handle placed after them.
    pub fn emit(name: &str, args: &[Value], callback: Option<u64>) -> Self {
        let mut arguments = Vec::with_capacity(args.len() + 2);
        arguments.push(Value::String(name.to_string()));
        arguments.extend_from_slice(args);

        let mut callbacks = BTreeMap::new();
        if let Some(id) = callback {
            callbacks.insert(id.to_string(), arguments.len());
            arguments.push(json!("[Function]"));
        }
        Self {
            method: Value::String("emit".into()),
            arguments,
            callbacks,
        }
    }

    /// Response frame resolving a previously sent callback handle.
    pub fn callback_response(id: u64, args: Vec<Value>) -> Self {
        Self {
            method: Value::from(id),
            arguments: args,
            callbacks: BTreeMap::new(),
        }
    }

    /// Session-level error frame.
    pub fn error(message: &str) -> Self {
        Self {
            method: Value::String("error".into()),
            arguments: vec![Value::String(message.to_string())],
            callbacks: BTreeMap::new(),
        }
    }

    /// Parses a raw channel message into a frame.
    pub fn parse(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    /// Serializes the frame back into a raw channel message.
    pub fn into_value(self) -> Value {
        // A struct of plain JSON fields cannot fail to serialize.
        serde_json::to_value(&self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_frame_shape() {
        let frame = WireMessage::methods(&["emit"]).into_value();
        assert_eq!(
            frame,
            json!({"method": "methods", "arguments": [{"emit": "[Function]"}]})
        );
    }

    #[test]
    fn test_emit_frame_with_callback_position() {
        let frame = WireMessage::emit("child::f", &[json!(7)], Some(42)).into_value();
        assert_eq!(
            frame,
            json!({
                "method": "emit",
                "arguments": ["child::f", 7, "[Function]"],
                "callbacks": {"42": 2}
            })
        );
    }

    #[test]
    fn test_emit_frame_without_callback_omits_map() {
        let frame = WireMessage::emit("ping", &[], None).into_value();
        assert_eq!(frame, json!({"method": "emit", "arguments": ["ping"]}));
    }

    #[test]
    fn test_parse_callback_response() {
        let raw = json!({"method": 42, "arguments": ["done"]});
        let msg = WireMessage::parse(raw).unwrap();
        assert_eq!(msg.method.as_u64(), Some(42));
        assert_eq!(msg.arguments, vec![json!("done")]);
        assert!(msg.callbacks.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(WireMessage::parse(json!("nope")).is_err());
        assert!(WireMessage::parse(json!({"arguments": []})).is_err());
    }
}
