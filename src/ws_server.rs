// WebSocket server: forwards client messages to the engine loop and pushes
// broadcast snapshots out to every connected client.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::broadcast::BroadcastHub;
use crate::protocol::ServerMessage;

/// Events emitted by the WebSocket server to the engine loop.
#[derive(Debug)]
pub enum WsEvent {
    /// A client connected. `reply` is a direct channel for messages meant
    /// only for this client (e.g. action rejections, catch-up snapshots).
    Connected {
        addr: String,
        reply: mpsc::Sender<ServerMessage>,
    },
    /// The client at `addr` disconnected.
    Disconnected { addr: String },
    /// A text message was received from the client (raw JSON string).
    Message { addr: String, text: String },
}

/// Run the WebSocket server on the given port.
///
/// Binds a TCP listener on `127.0.0.1:{port}` and accepts connections
/// concurrently. Each connection gets a reader task (forwarding messages as
/// [`WsEvent`]s through `tx`) and a writer task (draining the broadcast hub
/// plus the client's private reply channel into the socket). The server
/// runs until the task is cancelled or the engine drops its receiver.
pub async fn run(
    port: u16,
    tx: mpsc::Sender<WsEvent>,
    hub: Arc<BroadcastHub>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        if tx.is_closed() {
            break;
        }
        tokio::spawn(handle_connection(stream, addr.to_string(), tx.clone(), hub.clone()));
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: String,
    tx: mpsc::Sender<WsEvent>,
    hub: Arc<BroadcastHub>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    info!("Client connected from {addr}");

    let (write, read) = ws_stream.split();
    let (reply_tx, reply_rx) = mpsc::channel(64);
    let hub_rx = hub.subscribe();

    if tx
        .send(WsEvent::Connected {
            addr: addr.clone(),
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(write_messages(write, hub_rx, reply_rx, addr.clone()));

    let _ = process_messages(read, &tx, &addr).await;

    let _ = tx
        .send(WsEvent::Disconnected { addr: addr.clone() })
        .await;
    writer.abort();
}

/// Drain the broadcast hub and the client's private reply channel into the
/// WebSocket sink, in arrival order. Exits when the socket rejects a write
/// or both sources close. A lagged hub subscription is logged and skipped:
/// the client misses intermediate snapshots but stays connected.
async fn write_messages<S>(
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut hub_rx: broadcast::Receiver<ServerMessage>,
    mut reply_rx: mpsc::Receiver<ServerMessage>,
    addr: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            broadcast_msg = hub_rx.recv() => match broadcast_msg {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Client {addr} lagged, skipped {n} broadcast messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            reply_msg = reply_rx.recv() => match reply_msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let json = match serde_json::to_string(&msg) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize message for {addr}: {e}");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(json.into())).await {
            warn!("Write to {addr} failed: {e}");
            break;
        }
    }
}

/// Process incoming WebSocket messages from a read stream, forwarding text
/// messages through `tx`. Returns `Err(())` if the channel is closed
/// (receiver dropped), signalling the caller to stop.
pub async fn process_messages<S>(
    read: SplitStream<WebSocketStream<S>>,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    process_message_stream(read, tx, addr).await
}

/// Process raw WebSocket [`Message`] items from any [`Stream`], forwarding
/// text payloads through `tx`. This is a pure-logic function that requires
/// no I/O and is the primary unit-test target.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    addr: addr.to_string(),
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}
