//! Child configuration.
//!
//! [`ChildConfig`] collects the knobs for one supervised child: restart
//! policy inputs, spawn arguments, working directory, environment shaping
//! and stdio handling. A default config never restarts (`max: None` with
//! `forever: false` still restarts on every exit; see [`RestartPolicy`]
//! for how the fields combine).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policies::RestartPolicy;

/// Configuration for a supervised child process.
///
/// The restart fields (`forever`, `max`, `min_uptime`, `spin_sleep`) feed the
/// exit decision; the remaining fields shape how the child is spawned.
#[derive(Clone, Debug)]
pub struct ChildConfig {
    /// Restart on every exit regardless of the restart counter.
    pub forever: bool,
    /// Maximum number of exits before the child is left dead.
    /// `None` means unlimited.
    pub max: Option<u32>,
    /// Minimum uptime below which an exit counts as spinning.
    pub min_uptime: Duration,
    /// Delay applied before restarting a spinning child. A spinning child
    /// with no delay configured is terminated instead of restarted.
    pub spin_sleep: Option<Duration>,
    /// Arguments passed to the child program.
    pub args: Vec<String>,
    /// Base directory against which a relative script path is resolved.
    pub source_dir: Option<PathBuf>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Extra environment entries for the child; these win over inherited ones.
    pub env: HashMap<String, String>,
    /// Names of inherited environment variables withheld from the child.
    pub hide_env: Vec<String>,
    /// Let the child write directly to the parent's stdio instead of
    /// capturing it into `stdout`/`stderr` events.
    pub visible: bool,
    /// Drop the child's stdio entirely (no capture, no events).
    pub silent: bool,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            forever: false,
            max: None,
            min_uptime: Duration::ZERO,
            spin_sleep: None,
            args: Vec::new(),
            source_dir: None,
            cwd: None,
            env: HashMap::new(),
            hide_env: Vec::new(),
            visible: false,
            silent: false,
        }
    }
}

impl ChildConfig {
    /// Restart-policy view of this config, consumed by the exit decision.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            forever: self.forever,
            max: self.max,
            spin_sleep: self.spin_sleep,
        }
    }

    /// Resolves `script` against [`ChildConfig::source_dir`].
    ///
    /// Absolute paths are kept as-is; relative ones are joined onto the
    /// source dir when set, otherwise left relative to the parent's cwd.
    pub fn resolve_script(&self, script: &Path) -> PathBuf {
        if script.is_absolute() {
            return script.to_path_buf();
        }
        match &self.source_dir {
            Some(dir) => dir.join(script),
            None => script.to_path_buf(),
        }
    }

    /// Builds the child's environment: the parent's environment minus
    /// [`ChildConfig::hide_env`] entries, overlaid with [`ChildConfig::env`].
    pub fn merged_env(&self) -> HashMap<String, String> {
        let mut merged: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| !self.hide_env.iter().any(|h| h == k))
            .collect();
        for (k, v) in &self.env {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_script_joins_source_dir() {
        let cfg = ChildConfig {
            source_dir: Some(PathBuf::from("/srv/app")),
            ..Default::default()
        };
        assert_eq!(
            cfg.resolve_script(Path::new("worker.sh")),
            PathBuf::from("/srv/app/worker.sh")
        );
        assert_eq!(
            cfg.resolve_script(Path::new("/bin/true")),
            PathBuf::from("/bin/true")
        );
    }

    #[test]
    fn test_merged_env_hides_and_overlays() {
        std::env::set_var("TWINCOM_TEST_HIDDEN", "secret");
        std::env::set_var("TWINCOM_TEST_KEPT", "inherited");

        let mut cfg = ChildConfig::default();
        cfg.hide_env.push("TWINCOM_TEST_HIDDEN".into());
        cfg.env.insert("TWINCOM_TEST_KEPT".into(), "overridden".into());
        cfg.env.insert("TWINCOM_TEST_EXTRA".into(), "fresh".into());

        let env = cfg.merged_env();
        assert!(!env.contains_key("TWINCOM_TEST_HIDDEN"));
        assert_eq!(env.get("TWINCOM_TEST_KEPT").map(String::as_str), Some("overridden"));
        assert_eq!(env.get("TWINCOM_TEST_EXTRA").map(String::as_str), Some("fresh"));
    }

    #[test]
    fn test_restart_policy_projection() {
        let cfg = ChildConfig {
            forever: true,
            max: Some(10),
            spin_sleep: Some(Duration::from_millis(250)),
            ..Default::default()
        };
        let policy = cfg.restart_policy();
        assert!(policy.forever);
        assert_eq!(policy.max, Some(10));
        assert_eq!(policy.spin_sleep, Some(Duration::from_millis(250)));
    }
}
