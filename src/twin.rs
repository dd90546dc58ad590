//! Child-side attachment to the inherited channel.
//!
//! A process spawned by [`create`](crate::create) inherits one end of the
//! message channel through the [`CHANNEL_ENV`] environment variable.
//! [`Twin::attach`] connects to it, binds an RPC session, and hands back an
//! explicit context object; there is no ambient singleton, the `Twin` you
//! hold is the link you have.
//!
//! ```no_run
//! use serde_json::json;
//! use twincom::Twin;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), twincom::ComError> {
//!     let twin = Twin::attach().await?;
//!     twin.on("parent::*", |rec| println!("parent says: {:?}", rec.args));
//!     twin.ready({
//!         let twin = twin.clone();
//!         move || twin.emit("child::message", vec![json!("I am alive!")])
//!     });
//!     // keep running until the parent disconnects
//!     # Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::core::channel::{run_stream_io, ChannelEvent, ChannelProcess, CHANNEL_ENV};
use crate::error::ComError;
use crate::events::{EventRecord, Router};
use crate::rpc::{CallbackFn, MessageSink, RpcBinder, TeardownReason};

struct InheritedChannel {
    out_tx: UnboundedSender<Value>,
    token: CancellationToken,
}

impl ChannelProcess for InheritedChannel {
    fn pid(&self) -> Option<u32> {
        None
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
        // The far side is our parent; there is nothing to kill.
        tracing::debug!("kill() on an inherited channel is a no-op");
    }
}

/// Child-side handle to the parent over the inherited channel.
///
/// Cheap to clone; all clones share the same binding.
#[derive(Clone)]
pub struct Twin {
    router: Router,
    binder: RpcBinder,
    channel: Arc<InheritedChannel>,
}

impl fmt::Debug for Twin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Twin")
            .field("state", &self.binder.state())
            .finish()
    }
}

impl Twin {
    /// Connects to the inherited channel and starts the RPC handshake.
    ///
    /// Fails with [`ComError::MissingChannel`] when the process was not
    /// spawned with a channel, or the socket cannot be reached.
    pub async fn attach() -> Result<Self, ComError> {
        let path = std::env::var(CHANNEL_ENV).map_err(|_| ComError::MissingChannel)?;
        let stream = UnixStream::connect(&path).await.map_err(|err| {
            tracing::warn!(error = %err, path = %path, "channel socket unreachable");
            ComError::MissingChannel
        })?;

        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        tokio::spawn(run_stream_io(stream, out_rx, ev_tx, token.clone()));

        let channel = Arc::new(InheritedChannel { out_tx, token });
        let router = Router::new();
        let binder = RpcBinder::bind(router.clone(), channel.message_sink())?;
        tokio::spawn(drive(binder.clone(), ev_rx));

        Ok(Self {
            router,
            binder,
            channel,
        })
    }

    /// [`Twin::attach`] plus a closure deferred until the binding is ready.
    pub async fn attach_ready(f: impl FnOnce() + Send + 'static) -> Result<Self, ComError> {
        let twin = Self::attach().await?;
        twin.ready(f);
        Ok(twin)
    }

    /// See [`Router::on`].
    pub fn on(&self, pattern: &str, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        self.router.on(pattern, handler)
    }

    /// See [`Router::once`].
    pub fn once(
        &self,
        pattern: &str,
        handler: impl Fn(&EventRecord) + Send + Sync + 'static,
    ) -> u64 {
        self.router.once(pattern, handler)
    }

    /// See [`Router::on_any`].
    pub fn on_any(&self, handler: impl Fn(&EventRecord) + Send + Sync + 'static) -> u64 {
        self.router.on_any(handler)
    }

    /// See [`Router::off`].
    pub fn off(&self, id: u64) -> bool {
        self.router.off(id)
    }

    /// See [`Router::ready`].
    pub fn ready(&self, f: impl FnOnce() + Send + 'static) {
        self.router.ready(f);
    }

    pub fn is_ready(&self) -> bool {
        self.binder.is_ready()
    }

    /// Emits an event toward the parent; see [`Router::emit`].
    pub fn emit(&self, name: &str, args: Vec<Value>) {
        self.router.emit(name, args);
    }

    /// See [`Router::emit_with_callback`].
    pub fn emit_with_callback(&self, name: &str, args: Vec<Value>, callback: CallbackFn) {
        self.router.emit_with_callback(name, args, callback);
    }

    /// Deliberately disconnects from the parent: announces the intention,
    /// closes the channel and tears the binding down.
    pub fn disconnect(&self) {
        self.binder.disconnect(self.channel.as_ref());
    }
}

async fn drive(binder: RpcBinder, mut events: UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(frame) => binder.handle_message(frame),
            ChannelEvent::Disconnect => {
                binder.teardown(TeardownReason::Disconnect);
                break;
            }
            // Stdio and exit never occur on the inherited side.
            _ => {}
        }
    }
}
