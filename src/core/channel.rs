//! Channel transport: spawning a child with a private message channel.
//!
//! The supervisor never touches the OS directly; it goes through the
//! [`Spawner`] seam, which yields a [`ChannelProcess`] handle plus a single
//! queue of [`ChannelEvent`]s. Everything the child does (frames, stdio
//! lines, disconnect, exit) arrives on that one queue, so observers see one
//! total order per child lifetime.
//!
//! The real transport ([`OsSpawner`], unix only) spawns the child with
//! `tokio::process`, listens on a fresh unix socket whose path is handed to
//! the child via the [`CHANNEL_ENV`] environment variable, and frames
//! messages as newline-delimited JSON. Stdio is piped and re-emitted
//! line-by-line unless the config says otherwise.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::rpc::MessageSink;

/// Environment variable carrying the channel socket path to the child.
pub const CHANNEL_ENV: &str = "TWINCOM_CHANNEL";

/// One occurrence on a child's event queue.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A frame arrived on the message channel.
    Message(Value),
    /// One line of captured child stdout.
    Stdout(String),
    /// One line of captured child stderr.
    Stderr(String),
    /// The message channel closed while the process may still be running.
    Disconnect,
    /// The process exited. On unix, `signal` is set when a signal killed it.
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// Handle to a spawned process and its channel.
pub trait ChannelProcess: Send + Sync {
    /// OS process id, when known.
    fn pid(&self) -> Option<u32>;

    /// Outbound side of the message channel. `None` when the process was
    /// spawned without one.
    fn message_sink(&self) -> Option<MessageSink>;

    /// Closes the message channel without touching the process.
    fn disconnect(&self);

    /// Sends the termination signal to the process.
    fn kill(&self);
}

/// What the supervisor asks a spawner for.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: std::collections::HashMap<String, String>,
    /// Drop stdio entirely.
    pub silent: bool,
    /// Inherit the parent's stdio instead of capturing.
    pub visible: bool,
}

/// A spawned child: the control handle plus its event queue.
pub struct Spawned {
    pub process: Arc<dyn ChannelProcess>,
    pub events: UnboundedReceiver<ChannelEvent>,
}

/// Seam between the supervisor and the OS. Tests substitute scripted
/// implementations; production uses [`OsSpawner`].
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Spawned>;
}

#[cfg(unix)]
pub use os::OsSpawner;
#[cfg(unix)]
pub(crate) use os::run_stream_io;

#[cfg(unix)]
mod os {
    use std::path::PathBuf;
    use std::process::Stdio;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::process::Command;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use tokio_util::sync::CancellationToken;

    use super::{ChannelEvent, ChannelProcess, SpawnRequest, Spawned, Spawner, CHANNEL_ENV};
    use crate::rpc::MessageSink;

    static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

    fn socket_path() -> PathBuf {
        let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("twincom-{}-{seq}.sock", std::process::id()))
    }

    /// Spawns children with `tokio::process` and a unix-socket channel.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct OsSpawner;

    impl Spawner for OsSpawner {
        fn spawn(&self, request: &SpawnRequest) -> std::io::Result<Spawned> {
            if !request.program.exists() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("script {:?} does not exist", request.program),
                ));
            }
            let path = socket_path();
            let listener = UnixListener::bind(&path)?;

            let mut cmd = Command::new(&request.program);
            cmd.args(&request.args)
                .env_clear()
                .envs(&request.env)
                .env(CHANNEL_ENV, &path)
                .stdin(Stdio::null())
                .kill_on_drop(true);
            if let Some(cwd) = &request.cwd {
                cmd.current_dir(cwd);
            }
            if request.silent {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            } else if request.visible {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            } else {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    // The listener never reaches accept_and_drive, so its
                    // socket file must go here.
                    let _ = std::fs::remove_file(&path);
                    return Err(err);
                }
            };
            let pid = child.id();

            let (ev_tx, ev_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
            let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();
            let token = CancellationToken::new();

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(pump_lines(stdout, ev_tx.clone(), ChannelEvent::Stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(pump_lines(stderr, ev_tx.clone(), ChannelEvent::Stderr));
            }

            tokio::spawn(accept_and_drive(
                listener,
                path,
                out_rx,
                ev_tx.clone(),
                token.clone(),
            ));

            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx.recv() => {
                        if let Err(err) = child.start_kill() {
                            tracing::warn!(error = %err, "failed to signal child");
                        }
                        child.wait().await
                    }
                };
                let (code, signal) = match status {
                    Ok(status) => {
                        use std::os::unix::process::ExitStatusExt;
                        (status.code(), status.signal())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to await child exit");
                        (None, None)
                    }
                };
                let _ = ev_tx.send(ChannelEvent::Exit { code, signal });
            });

            Ok(Spawned {
                process: Arc::new(OsProcess {
                    pid,
                    out_tx,
                    kill_tx,
                    token,
                }),
                events: ev_rx,
            })
        }
    }

    struct OsProcess {
        pid: Option<u32>,
        out_tx: UnboundedSender<Value>,
        kill_tx: UnboundedSender<()>,
        token: CancellationToken,
    }

    impl ChannelProcess for OsProcess {
        fn pid(&self) -> Option<u32> {
            self.pid
        }

        fn message_sink(&self) -> Option<MessageSink> {
            let tx = self.out_tx.clone();
            Some(MessageSink::new(move |frame| {
                let _ = tx.send(frame);
            }))
        }

        fn disconnect(&self) {
            self.token.cancel();
        }

        fn kill(&self) {
            let _ = self.kill_tx.send(());
        }
    }

    async fn pump_lines<R>(
        reader: R,
        ev_tx: UnboundedSender<ChannelEvent>,
        wrap: fn(String) -> ChannelEvent,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if ev_tx.send(wrap(line)).is_err() {
                break;
            }
        }
    }

    async fn accept_and_drive(
        listener: UnixListener,
        path: PathBuf,
        out_rx: UnboundedReceiver<Value>,
        ev_tx: UnboundedSender<ChannelEvent>,
        token: CancellationToken,
    ) {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => Some(stream),
                Err(err) => {
                    tracing::warn!(error = %err, "channel accept failed");
                    None
                }
            },
            _ = token.cancelled() => None,
        };
        if let Some(stream) = stream {
            run_stream_io(stream, out_rx, ev_tx, token).await;
        }
        let _ = std::fs::remove_file(&path);
    }

    /// Pumps newline-framed JSON in both directions until the peer closes,
    /// the sink side is dropped, or the token fires. Used by both ends of
    /// the channel.
    pub(crate) async fn run_stream_io(
        stream: UnixStream,
        mut out_rx: UnboundedReceiver<Value>,
        ev_tx: UnboundedSender<ChannelEvent>,
        token: CancellationToken,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = write_half.shutdown().await;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                        Ok(frame) => {
                            if ev_tx.send(ChannelEvent::Message(frame)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping unparseable channel line");
                        }
                    },
                    Ok(None) | Err(_) => {
                        let _ = ev_tx.send(ChannelEvent::Disconnect);
                        break;
                    }
                },
                frame = out_rx.recv() => match frame {
                    Some(frame) => {
                        let mut line = frame.to_string();
                        line.push('\n');
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            let _ = ev_tx.send(ChannelEvent::Disconnect);
                            break;
                        }
                    }
                    None => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // A plain data file passes the existence check but fails at spawn,
    // after the listener socket was already bound.
    #[tokio::test]
    async fn test_spawn_failure_removes_socket_file() {
        let dir = std::env::temp_dir();
        let script = dir.join(format!("twincom-test-noexec-{}", std::process::id()));
        std::fs::write(&script, b"plain data").unwrap();

        let request = SpawnRequest {
            program: script.clone(),
            args: Vec::new(),
            cwd: None,
            env: std::collections::HashMap::new(),
            silent: true,
            visible: false,
        };
        let err = match OsSpawner.spawn(&request) {
            Ok(_) => panic!("spawn of a non-executable file succeeded"),
            Err(err) => err,
        };
        assert_ne!(err.kind(), std::io::ErrorKind::NotFound);

        let prefix = format!("twincom-{}-", std::process::id());
        let leftover: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&prefix) && n.ends_with(".sock"))
            .collect();
        assert!(leftover.is_empty(), "socket files left behind: {leftover:?}");

        let _ = std::fs::remove_file(&script);
    }
}
