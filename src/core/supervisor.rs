//! Child supervision: spawn, monitor, restart.
//!
//! [`create`] spawns nothing by itself; it hands back a [`Child`] whose
//! `start()` runs the spawn sequence:
//!
//! ```text
//! start()
//!   ├─► Spawner::spawn (channel + stdio + waiter tasks)
//!   ├─► RpcBinder::bind (handshake goes out)
//!   ├─► emit start { data snapshot }
//!   └─► driver task: drains the child's event queue
//!         ├─ Message    ─► binder.handle_message
//!         ├─ Stdout/Err ─► emit stdout / stderr
//!         ├─ Disconnect ─► binder.teardown
//!         └─ Exit       ─► exit decision:
//!              ├─ Terminate    ─► emit exit, close   (child stays dead)
//!              ├─ RestartAfter ─► sleep, start again (spin dampening)
//!              └─ Restart      ─► start again next tick
//! ```
//!
//! One driver task exists per child lifetime, so every observer sees the
//! child's frames, stdio and exit in a single total order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::ChildConfig;
use crate::core::channel::{ChannelEvent, ChannelProcess, SpawnRequest, Spawner};
use crate::error::ComError;
use crate::events::{EventArg, EventRecord, Router};
use crate::policies::{decide, ExitAction, ExitFlags};
use crate::rpc::{CallbackFn, HandleStats, RpcBinder, TeardownReason};

/// Snapshot describing the currently running child, carried by the
/// `start`/`restart`/`stop` events and exposed via [`Child::data`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChildData {
    /// Spawn time, milliseconds since the unix epoch.
    pub started_at: u64,
    /// Resolved script path.
    pub script: PathBuf,
    /// Arguments the child was spawned with.
    pub args: Vec<String>,
    /// OS process id, when known.
    pub pid: Option<u32>,
    /// Environment the child received.
    pub env: std::collections::HashMap<String, String>,
    /// Working directory, when configured.
    pub cwd: Option<PathBuf>,
}

#[derive(Default)]
struct RunState {
    running: bool,
    times: u32,
    force_stop: bool,
    force_restart: bool,
    started_at: Option<Instant>,
    binder: Option<RpcBinder>,
    channel: Option<Arc<dyn ChannelProcess>>,
    data: Option<ChildData>,
}

struct Shared {
    router: Router,
    script: PathBuf,
    config: ChildConfig,
    spawner: Arc<dyn Spawner>,
    state: Mutex<RunState>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a supervised child for `script` using the OS transport.
///
/// Nothing runs until [`Child::start`] is called. Requires a tokio runtime.
#[cfg(unix)]
pub fn create(script: impl Into<PathBuf>, config: ChildConfig) -> Child {
    Child::with_spawner(script, config, Arc::new(crate::core::channel::OsSpawner))
}

/// Handle to one supervised child process.
///
/// Cheap to clone; all clones share the same child and subscription table.
/// Lifecycle misuse and spawn failures surface as `error` events rather
/// than return values, so supervision stays observable from one place.
#[derive(Clone)]
pub struct Child {
    shared: Arc<Shared>,
}

impl Child {
    pub(crate) fn with_spawner(
        script: impl Into<PathBuf>,
        config: ChildConfig,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                router: Router::new(),
                script: script.into(),
                config,
                spawner,
                state: Mutex::new(RunState::default()),
            }),
        }
    }

    /// Spawns the child. Emits `start` on success, `error` when the child
    /// is already running or the spawn fails.
    pub fn start(&self) {
        start_child(&self.shared, false);
    }

    /// Stops the child for good: disconnect sequence, termination signal,
    /// `stop` event. The following exit is final regardless of policy.
    pub fn stop(&self) {
        self.kill(true);
    }

    /// Kills the running child and lets the exit decision bring it back.
    pub fn restart(&self) {
        self.shared.lock().force_restart = true;
        self.kill(false);
    }

    /// Signals the child to terminate. With `force` the exit is final;
    /// without it the restart policy applies as usual.
    pub fn kill(&self, force: bool) {
        let (binder, channel, data) = {
            let mut st = self.shared.lock();
            if !st.running {
                drop(st);
                emit_error(&self.shared.router, &ComError::NotRunning);
                return;
            }
            if force {
                st.force_stop = true;
            }
            (st.binder.clone(), st.channel.clone(), st.data.clone())
        };
        if let (Some(binder), Some(channel)) = (&binder, &channel) {
            binder.disconnect(channel.as_ref());
        }
        if let Some(channel) = &channel {
            channel.kill();
        }
        self.shared
            .router
            .local_emit("stop", vec![EventArg::Value(data_value(data.as_ref()))]);
    }

    /// See [`Router::on`].
    pub fn on(&self, pattern: &str, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        self.shared.router.on(pattern, handler)
    }

    /// See [`Router::once`].
    pub fn once(
        &self,
        pattern: &str,
        handler: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> u64 {
        self.shared.router.once(pattern, handler)
    }

    /// See [`Router::on_any`].
    pub fn on_any(&self, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        self.shared.router.on_any(handler)
    }

    /// See [`Router::off`].
    pub fn off(&self, id: u64) -> bool {
        self.shared.router.off(id)
    }

    /// See [`Router::ready`].
    pub fn ready(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.router.ready(f);
    }

    /// Emits an event toward the child; see [`Router::emit`].
    pub fn emit(&self, name: &str, args: Vec<Value>) {
        self.shared.router.emit(name, args);
    }

    /// See [`Router::emit_with_callback`].
    pub fn emit_with_callback(&self, name: &str, args: Vec<Value>, callback: CallbackFn) {
        self.shared.router.emit_with_callback(name, args, callback);
    }

    /// Snapshot of the running child; `None` while stopped.
    pub fn data(&self) -> Option<ChildData> {
        let st = self.shared.lock();
        if st.running {
            st.data.clone()
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Total exits observed so far.
    pub fn times(&self) -> u32 {
        self.shared.lock().times
    }

    /// Callback handle counters of the live RPC session, when bound.
    pub fn rpc_stats(&self) -> Option<HandleStats> {
        let binder = self.shared.lock().binder.clone();
        binder.and_then(|b| b.stats())
    }
}

fn emit_error(router: &Router, err: &ComError) {
    router.local_emit(
        "error",
        vec![EventArg::Value(Value::String(err.to_string()))],
    );
}

fn data_value(data: Option<&ChildData>) -> Value {
    data.and_then(|d| serde_json::to_value(d).ok())
        .unwrap_or(Value::Null)
}

fn start_child(shared: &Arc<Shared>, restarting: bool) {
    if !restarting && shared.lock().running {
        emit_error(&shared.router, &ComError::AlreadyRunning);
        return;
    }

    let script = shared.config.resolve_script(&shared.script);
    let env = shared.config.merged_env();
    let request = SpawnRequest {
        program: script.clone(),
        args: shared.config.args.clone(),
        cwd: shared.config.cwd.clone(),
        env: env.clone(),
        silent: shared.config.silent,
        visible: shared.config.visible,
    };

    let spawned = match shared.spawner.spawn(&request) {
        Ok(spawned) => spawned,
        Err(err) => {
            let failure = ComError::SpawnFailure {
                script,
                reason: err.to_string(),
            };
            tracing::warn!(error = %failure, "spawn failed");
            emit_error(&shared.router, &failure);
            return;
        }
    };

    let binder = match RpcBinder::bind(shared.router.clone(), spawned.process.message_sink()) {
        Ok(binder) => Some(binder),
        Err(err) => {
            emit_error(&shared.router, &err);
            None
        }
    };

    let data = ChildData {
        started_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        script,
        args: shared.config.args.clone(),
        pid: spawned.process.pid(),
        env,
        cwd: shared.config.cwd.clone(),
    };

    {
        let mut st = shared.lock();
        st.running = true;
        st.started_at = Some(Instant::now());
        st.binder = binder;
        st.channel = Some(spawned.process.clone());
        st.data = Some(data.clone());
    }

    tracing::info!(pid = ?data.pid, script = ?data.script, restarting, "child spawned");
    shared.router.local_emit(
        if restarting { "restart" } else { "start" },
        vec![EventArg::Value(data_value(Some(&data)))],
    );

    let shared = Arc::clone(shared);
    tokio::spawn(drive(shared, spawned.events));
}

async fn drive(shared: Arc<Shared>, mut events: UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(frame) => {
                let binder = shared.lock().binder.clone();
                if let Some(binder) = binder {
                    binder.handle_message(frame);
                }
            }
            ChannelEvent::Stdout(line) => {
                shared
                    .router
                    .local_emit("stdout", vec![EventArg::Value(Value::String(line))]);
            }
            ChannelEvent::Stderr(line) => {
                shared
                    .router
                    .local_emit("stderr", vec![EventArg::Value(Value::String(line))]);
            }
            ChannelEvent::Disconnect => {
                let binder = shared.lock().binder.clone();
                if let Some(binder) = binder {
                    binder.teardown(TeardownReason::Disconnect);
                }
            }
            ChannelEvent::Exit { code, signal } => {
                handle_exit(&shared, code, signal);
                break;
            }
        }
    }
}

fn handle_exit(shared: &Arc<Shared>, code: Option<i32>, signal: Option<i32>) {
    let (binder, spinning, action) = {
        let mut st = shared.lock();
        let uptime = st.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let spinning = uptime < shared.config.min_uptime;
        st.times += 1;

        let flags = ExitFlags {
            force_stop: st.force_stop,
            force_restart: st.force_restart,
        };
        let action = decide(&shared.config.restart_policy(), flags, spinning, st.times);

        let binder = st.binder.take();
        st.channel = None;
        st.force_restart = false;
        if action == ExitAction::Terminate {
            st.running = false;
            st.force_stop = false;
        }
        (binder, spinning, action)
    };

    // The binding dies with the process; a deliberate disconnect may have
    // torn it down already.
    if let Some(binder) = binder {
        binder.teardown(TeardownReason::Exit);
    }

    match action {
        ExitAction::Terminate => {
            tracing::info!(?code, ?signal, spinning, "child exited; letting it die");
            shared.router.local_emit(
                "exit",
                vec![
                    EventArg::Value(serde_json::json!(code)),
                    EventArg::Value(serde_json::json!(signal)),
                ],
            );
            shared.router.local_emit(
                "close",
                vec![
                    EventArg::Value(Value::Bool(spinning)),
                    EventArg::Value(serde_json::json!(code)),
                    EventArg::Value(serde_json::json!(signal)),
                ],
            );
        }
        ExitAction::RestartAfter(delay) => {
            tracing::warn!(?delay, "child is spinning; delaying restart");
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                start_child(&shared, true);
            });
        }
        ExitAction::Restart => {
            tracing::info!(times = shared.lock().times, "restarting child");
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                start_child(&shared, true);
            });
        }
    }
}
