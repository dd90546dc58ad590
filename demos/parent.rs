//! Parent side of the demo pair. Run the child binary build first, then:
//!
//! ```text
//! cargo build --example child
//! cargo run --example parent
//! ```

use serde_json::json;
use tokio::sync::Notify;
use twincom::{create, ChildConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().init();

    let child_bin = std::env::current_exe()
        .expect("own path")
        .with_file_name("child");

    let child = create(child_bin, ChildConfig::default());
    let done = std::sync::Arc::new(Notify::new());

    child.on("stdout", |rec| {
        println!("stdout: {}", rec.args[0].as_str().unwrap_or_default());
    });

    let c = child.clone();
    child.on("child::message", move |rec| {
        println!("Child says: {:?}", rec.args[0].as_str().unwrap_or_default());
        c.emit("parent::message", vec![json!("This is your parent!")]);
    });

    let c = child.clone();
    child.on("child::quit", move |_| {
        println!("Child wants to quit!");
        c.stop();
    });

    let finished = done.clone();
    child.on("close", move |_| finished.notify_one());

    child.start();
    done.notified().await;
}
