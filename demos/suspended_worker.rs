//! Background worker that is suspended and restarted while a client keeps sending.
//!
//! The client never sees an error: messages sent while the worker is down are queued and
//! delivered, in order, once the worker is listening again.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example suspended_worker --features tracing
//! ```

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;
use worker_connection::BROWSER_VAR;
use worker_connection::port::config::{Config, ReconnectConfig};
use worker_connection::port::{ConnectionManager, LocalHub};
use worker_connection::types::Browser;

const CHANNEL: &str = "content-script";

/// Echo every message back until the client goes away or the worker is suspended.
async fn run_worker(hub: LocalHub<String>, generation: u32, lifetime: Duration) {
    let mut listener = hub.listen(CHANNEL);
    let Some(mut port) = listener.accept().await else {
        return;
    };
    info!(generation, "Worker accepted connection");

    let deadline = sleep(lifetime);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => {
                info!(generation, "Worker suspending");
                port.disconnect(Some("suspended".to_owned()));
                return;
            }
            message = port.recv() => {
                let Some(message) = message else {
                    return;
                };
                info!(generation, %message, "Worker received");
                if port.send(format!("ack {message}")).is_err() {
                    return;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let environment = match std::env::var(BROWSER_VAR) {
        Ok(value) => value.parse()?,
        Err(_) => Browser::default(),
    };
    let config = Config::builder()
        .environment(environment)
        .reconnect(
            ReconnectConfig::builder()
                .delay(Duration::from_millis(500))
                .build(),
        )
        .build();

    let hub = LocalHub::new();
    let worker = tokio::spawn(run_worker(hub.clone(), 1, Duration::from_secs(1)));

    let client = ConnectionManager::with_handler(
        CHANNEL.to_owned(),
        hub.clone(),
        config,
        |reply: String| info!(%reply, "Client received"),
    )?;

    for seq in 0..8 {
        client.send(format!("message {seq}"));
        info!(seq, state = ?client.state(), queued = client.queued(), "Client sent");
        sleep(Duration::from_millis(300)).await;

        if seq == 4 {
            worker.abort();
            info!("Worker restarting");
            tokio::spawn(run_worker(hub.clone(), 2, Duration::from_secs(10)));
        }
    }

    sleep(Duration::from_secs(2)).await;
    let undelivered = client.close();
    info!(undelivered = undelivered.len(), "Client closed");

    Ok(())
}
