//! Per-connection session driver — the protocol state machine.
//!
//! A session moves through three states, enforced by control flow rather
//! than a state field:
//!
//! 1. **Connecting** — the HTTP upgrade is done but the relay has not
//!    yet minted an identity. No frames are read in this state, so an
//!    early message cannot be attributed to a connection that does not
//!    exist yet.
//! 2. **Open** — registered. Inbound text frames become relay commands;
//!    the writer task drains the outbound queue into the sink.
//! 3. **Closed** — terminal. The session unregisters exactly once and
//!    never re-enters the live set; a reconnecting client is a brand-new
//!    session with a brand-new identity.
//!
//! Saves in flight at close time are unaffected: the dispatcher does not
//! cancel work, and their broadcasts go to whoever is still live.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use super::relay::RelayHandle;

/// A server-side WebSocket connection after the upgrade handshake.
pub type WsStream = WebSocketStream<TcpStream>;

/// Drives one upgraded connection until it closes.
///
/// Owns the whole lifecycle: register, pump frames, unregister.
pub async fn drive(ws: WsStream, relay: RelayHandle) {
    // Connecting: mint an identity before reading a single frame.
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let Ok(identity) = relay.open(outbound_tx).await else {
        debug!("relay unavailable — dropping fresh connection");
        return;
    };
    info!(%identity, "websocket session open");

    // Open: reader here, writer on its own task.
    let (sink, mut frames) = ws.split();
    let mut writer = tokio::spawn(write_outbound(sink, outbound_rx));

    let reason = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => relay.inbound(identity, text),
                Some(Ok(Message::Close(_))) | None => break "closed by peer",
                Some(Ok(other)) => {
                    // Binary and control frames are not part of the chat
                    // protocol; tungstenite answers pings internally.
                    debug!(%identity, kind = frame_kind(&other), "ignoring non-text frame");
                }
                Some(Err(error)) => {
                    debug!(%identity, %error, "transport error");
                    break "transport error";
                }
            },
            _ = &mut writer => break "write half closed",
        }
    };

    // Closed: leave the live set. Dropping the registry's sender ends the
    // writer task, which closes the sink on its way out.
    relay.close(identity);
    info!(%identity, reason, "websocket session closed");
}

// Forward broadcast payloads from the connection's outbound queue to the
// socket. Ends when the queue closes (unregistered) or a write fails.
async fn write_outbound(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(payload) = outbound.recv().await {
        if let Err(error) = sink.send(Message::Text(payload)).await {
            debug!(%error, "outbound write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "raw",
    }
}
