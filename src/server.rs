// WebSocket server for communication with the UI surfaces.
//
// Each surface (popup, options page, raffle-page content script) opens
// one connection. Requests flow into the application loop; responses
// and broadcast notices flow back out over the same socket. Unlike the
// request path, notices are fan-out: every live connection gets them.

use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::protocol::ServerNotice;

/// Events emitted by the WebSocket server to the application layer.
#[derive(Debug)]
pub enum ServerEvent {
    /// A surface connected.
    Connected { conn_id: u64, addr: String },
    /// A text request was received (raw JSON string). `reply` delivers
    /// this connection's responses.
    Request {
        conn_id: u64,
        text: String,
        reply: mpsc::Sender<String>,
    },
    /// The surface disconnected.
    Disconnected { conn_id: u64 },
}

/// Run the WebSocket server on the given port, forwarding surface
/// events through `app_tx` and notices from `broadcaster` back out.
///
/// Connections are served concurrently -- the popup, the options page,
/// and any number of raffle tabs may all be open at once.
pub async fn run(
    port: u16,
    app_tx: mpsc::Sender<ServerEvent>,
    broadcaster: Broadcaster,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    let local_addr = listener.local_addr()?;
    info!("surface server listening on {local_addr}");

    let mut next_conn_id: u64 = 0;
    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {addr_str}: {e}");
                continue;
            }
        };

        next_conn_id += 1;
        tokio::spawn(handle_connection(
            ws_stream,
            next_conn_id,
            addr_str,
            app_tx.clone(),
            broadcaster.subscribe(),
        ));
    }
}

/// Serve one surface connection until it closes.
async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    conn_id: u64,
    addr: String,
    app_tx: mpsc::Sender<ServerEvent>,
    notices: broadcast::Receiver<ServerNotice>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();
    let (reply_tx, reply_rx) = mpsc::channel::<String>(64);

    if app_tx
        .send(ServerEvent::Connected {
            conn_id,
            addr: addr.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(write_loop(write, reply_rx, notices, conn_id));

    let _ = process_request_stream(read, conn_id, &app_tx, &reply_tx, &addr).await;

    // A router task spawned for this connection may still hold a reply
    // sender; the socket is gone, so stop writing outright.
    writer.abort();
    let _ = app_tx.send(ServerEvent::Disconnected { conn_id }).await;
}

/// Forward responses and broadcast notices onto the socket until either
/// side goes away.
async fn write_loop<S>(
    mut write: SplitSink<WebSocketStream<S>, Message>,
    mut reply_rx: mpsc::Receiver<String>,
    mut notices: broadcast::Receiver<ServerNotice>,
    conn_id: u64,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            reply = reply_rx.recv() => {
                let Some(json) = reply else { break };
                if write.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => {
                        if write.send(Message::Text(notice.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Best-effort delivery: the surface will catch up
                        // from the next full snapshot.
                        warn!(conn_id, skipped, "surface lagging, notices dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Process raw WebSocket [`Message`] items from any [`Stream`],
/// forwarding text payloads as [`ServerEvent::Request`]s. This is a
/// pure-logic function that requires no I/O and is the primary
/// unit-test target. Returns `Err(())` if the app channel is closed,
/// signalling the caller to stop.
pub async fn process_request_stream<St>(
    mut stream: St,
    conn_id: u64,
    app_tx: &mpsc::Sender<ServerEvent>,
    reply_tx: &mpsc::Sender<String>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = ServerEvent::Request {
                    conn_id,
                    text: text.to_string(),
                    reply: reply_tx.clone(),
                };
                if app_tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("surface {addr} sent close frame");
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
