//! Child side of the demo pair; spawned by the `parent` example.

use serde_json::json;
use twincom::Twin;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), twincom::ComError> {
    let twin = Twin::attach().await?;

    twin.ready({
        let twin = twin.clone();
        move || {
            println!("Comms Ready, sending message!");
            twin.emit("child::message", vec![json!("I am alive!")]);
        }
    });

    twin.on("parent::message", {
        let twin = twin.clone();
        move |rec| {
            println!("The parent says: {}", rec.args[0].as_str().unwrap_or_default());
            twin.emit("child::quit", vec![]);
        }
    });

    println!("Child is setup!!");

    // Run until the parent tears the channel down.
    let (finished_tx, finished_rx) = tokio::sync::oneshot::channel::<()>();
    let finished_tx = std::sync::Mutex::new(Some(finished_tx));
    twin.on("disconnected", move |_| {
        if let Some(tx) = finished_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(());
        }
    });
    let _ = finished_rx.await;
    Ok(())
}
