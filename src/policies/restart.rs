//! # Restart policy for supervised children.
//!
//! [`decide`] is the single place where an exit turns into an action. It is
//! a pure function over the policy, the pending control flags and the exit
//! observation, so every branch is table-testable.
//!
//! Priority order, first match wins:
//!
//! ```text
//! force-stop pending                        → Terminate
//! restart budget exhausted (and !forever)   → Terminate
//! spinning, no spin delay, no force-restart → Terminate
//! spinning                                  → RestartAfter(spin_sleep)
//! otherwise                                 → Restart
//! ```
//!
//! "Spinning" means the child lived for less than the configured minimum
//! uptime; restarting such a child immediately would just spin the loop.

use std::time::Duration;

/// Restart inputs projected out of a child config.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestartPolicy {
    /// Restart on every exit regardless of the counter.
    pub forever: bool,
    /// Exit budget; `None` means unlimited.
    pub max: Option<u32>,
    /// Delay before restarting a spinning child; `None` terminates it.
    pub spin_sleep: Option<Duration>,
}

/// Pending one-shot control flags at the time of an exit.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitFlags {
    /// A stop/kill was requested; the exit is final.
    pub force_stop: bool,
    /// A restart was requested; overrides spin termination.
    pub force_restart: bool,
}

/// What the supervisor does with an exited child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitAction {
    /// Leave the child dead and emit the terminal events.
    Terminate,
    /// Restart after a delay (spin dampening).
    RestartAfter(Duration),
    /// Restart on the next scheduler tick.
    Restart,
}

/// Decides the action for one exit.
///
/// `times` is the total number of exits observed so far, including the one
/// being decided.
pub fn decide(policy: &RestartPolicy, flags: ExitFlags, spinning: bool, times: u32) -> ExitAction {
    if flags.force_stop {
        return ExitAction::Terminate;
    }
    if !policy.forever {
        if let Some(max) = policy.max {
            if times >= max {
                return ExitAction::Terminate;
            }
        }
    }
    if spinning {
        return match policy.spin_sleep {
            Some(delay) => ExitAction::RestartAfter(delay),
            None if flags.force_restart => ExitAction::Restart,
            None => ExitAction::Terminate,
        };
    }
    ExitAction::Restart
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(forever: bool, max: Option<u32>, spin_sleep: Option<Duration>) -> RestartPolicy {
        RestartPolicy {
            forever,
            max,
            spin_sleep,
        }
    }

    const NO_FLAGS: ExitFlags = ExitFlags {
        force_stop: false,
        force_restart: false,
    };

    #[test]
    fn test_force_stop_always_terminates() {
        let flags = ExitFlags {
            force_stop: true,
            force_restart: true,
        };
        let p = policy(true, None, Some(Duration::from_secs(1)));
        assert_eq!(decide(&p, flags, true, 0), ExitAction::Terminate);
        assert_eq!(decide(&p, flags, false, 0), ExitAction::Terminate);
    }

    #[test]
    fn test_budget_exhaustion_terminates() {
        let p = policy(false, Some(3), None);
        assert_eq!(decide(&p, NO_FLAGS, false, 3), ExitAction::Terminate);
        assert_eq!(decide(&p, NO_FLAGS, false, 4), ExitAction::Terminate);
        assert_eq!(decide(&p, NO_FLAGS, false, 2), ExitAction::Restart);
    }

    #[test]
    fn test_forever_overrides_budget() {
        let p = policy(true, Some(1), None);
        assert_eq!(decide(&p, NO_FLAGS, false, 100), ExitAction::Restart);
    }

    #[test]
    fn test_unlimited_budget_restarts() {
        let p = policy(false, None, None);
        assert_eq!(decide(&p, NO_FLAGS, false, 1_000_000), ExitAction::Restart);
    }

    #[test]
    fn test_spin_without_delay_terminates() {
        let p = policy(false, None, None);
        assert_eq!(decide(&p, NO_FLAGS, true, 1), ExitAction::Terminate);
    }

    #[test]
    fn test_spin_with_delay_restarts_after_it() {
        let p = policy(false, None, Some(Duration::from_millis(250)));
        assert_eq!(
            decide(&p, NO_FLAGS, true, 1),
            ExitAction::RestartAfter(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_force_restart_overrides_spin_termination() {
        let flags = ExitFlags {
            force_stop: false,
            force_restart: true,
        };
        let p = policy(false, None, None);
        assert_eq!(decide(&p, flags, true, 1), ExitAction::Restart);
    }

    #[test]
    fn test_budget_beats_spin_delay() {
        // Budget exhaustion is checked before the spin branch.
        let p = policy(false, Some(2), Some(Duration::from_millis(10)));
        assert_eq!(decide(&p, NO_FLAGS, true, 2), ExitAction::Terminate);
        assert_eq!(
            decide(&p, NO_FLAGS, true, 1),
            ExitAction::RestartAfter(Duration::from_millis(10))
        );
    }
}
