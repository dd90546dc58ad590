//! Event names: the reserved lifecycle set and `::`-delimited patterns.
//!
//! Event names are namespaced with `::` (for example `child::message`).
//! A fixed set of bare names is reserved for lifecycle notifications and
//! must never transit the channel in either direction; the router and the
//! binder both enforce this with [`is_reserved`].
//!
//! [`Pattern`] is the subscription matcher: a literal name, optionally with
//! `*` standing for exactly one segment (`child::*` matches `child::message`
//! but not `child::a::b`).

/// Lifecycle event names that never cross the process boundary.
///
/// Reserved names are delivered locally by the runtime itself; user code may
/// subscribe to them but may not route them to the twin, and frames carrying
/// them from the twin are rejected.
pub const RESERVED_EVENTS: &[&str] = &[
    "error",
    "stdout",
    "stderr",
    "warn",
    "exit",
    "close",
    "start",
    "restart",
    "stop",
    "rpcready",
    "rpcexit",
    "disconnect",
    "disconnected",
];

/// Returns `true` if `name` is one of the reserved lifecycle names.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_EVENTS.contains(&name)
}

/// A subscription pattern over `::`-delimited event names.
///
/// Each `*` segment matches exactly one name segment. Segment counts must
/// agree, so `child::*` does not match a bare `child` or `child::a::b`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<String>,
}

impl Pattern {
    /// Parses a pattern from its `::`-delimited text form.
    pub fn parse(text: &str) -> Self {
        Self {
            segments: text.split("::").map(str::to_string).collect(),
        }
    }

    /// Tests an event name against this pattern.
    pub fn matches(&self, name: &str) -> bool {
        let mut parts = name.split("::");
        let mut segs = self.segments.iter();
        loop {
            match (segs.next(), parts.next()) {
                (None, None) => return true,
                (Some(seg), Some(part)) => {
                    if seg != "*" && seg != part {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_set_is_closed() {
        assert_eq!(RESERVED_EVENTS.len(), 13);
        for name in ["error", "rpcready", "disconnected", "close"] {
            assert!(is_reserved(name), "{name} must be reserved");
        }
        assert!(!is_reserved("child::message"));
        assert!(!is_reserved("errors"));
    }

    #[test]
    fn test_literal_patterns() {
        let p = Pattern::parse("child::message");
        assert!(p.matches("child::message"));
        assert!(!p.matches("child::other"));
        assert!(!p.matches("child"));
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        let p = Pattern::parse("child::*");
        assert!(p.matches("child::message"));
        assert!(p.matches("child::quit"));
        assert!(!p.matches("child"));
        assert!(!p.matches("child::a::b"));
        assert!(!p.matches("parent::message"));
    }

    #[test]
    fn test_wildcard_in_any_position() {
        let p = Pattern::parse("*::message");
        assert!(p.matches("child::message"));
        assert!(p.matches("parent::message"));
        assert!(!p.matches("message"));
    }
}
