//! Runnable chat relay: WebSocket broadcast on `/websocket`, JSONL
//! persistence, and a plain-HTTP fallback for everything else.
//!
//! ```sh
//! cargo run --example chat_relay
//! # then connect a couple of clients:
//! #   websocat ws://127.0.0.1:8888/websocket
//! ```

use std::sync::Arc;

use rtchat::http::{Response, StatusCode};
use rtchat::realtime::{Relay, RelayConfig};
use rtchat::server::Server;
use rtchat::storage::JsonlStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rtchat=debug")),
        )
        .init();

    let config = RelayConfig::default().addr("127.0.0.1:8888");
    let store = Arc::new(JsonlStore::open("messages.jsonl")?);

    let (relay, handle) = Relay::new(store, config.workers)?;
    tokio::spawn(relay.run());

    let server = Server::bind(&config.addr).await?;
    println!(
        "Chat relay on ws://{}{} — messages append to messages.jsonl",
        server.local_addr(),
        config.realtime_path
    );

    server
        .serve(config.realtime_path, handle, |request| async move {
            match request.path() {
                "/" => Response::new(StatusCode::Ok)
                    .body("rtchat is running; connect a WebSocket client to /websocket\n"),
                _ => Response::new(StatusCode::NotFound).body("Not Found\n"),
            }
        })
        .await?;

    Ok(())
}
