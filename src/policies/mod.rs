//! Restart policy for supervised children.
//!
//! This module groups the knobs that control **whether** a child comes back
//! after an exit and **how fast** a crash-looping child is slowed down.
//!
//! ## Contents
//! - [`RestartPolicy`] restart budget and spin-dampening inputs
//! - [`ExitFlags`] pending force-stop/force-restart requests
//! - [`ExitAction`], [`decide`] the pure exit decision
//!
//! ## Quick wiring
//! ```text
//! ChildConfig { forever, max, min_uptime, spin_sleep }
//!      └─► core::supervisor exit handler:
//!           - spinning = uptime < min_uptime
//!           - decide(policy, flags, spinning, times) → Terminate / Restart(…)
//! ```

mod restart;

pub use restart::{decide, ExitAction, ExitFlags, RestartPolicy};
