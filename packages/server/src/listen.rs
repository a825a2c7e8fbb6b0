//! Serve a namespace over an accepted WebSocket.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use pathlink_api::{Entry, ErrorEntry, Error, WireFrame};

use crate::server::{FrameSink, Server};

const AUTHORITY: &str = "pathlink/server";

/// Finish the WebSocket handshake on a raw stream, then serve it.
pub async fn accept_websocket<S>(
    stream: S,
    make_server: impl FnOnce(FrameSink) -> Server,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::transport(format!("websocket handshake failed: {}", e)))?;
    serve_websocket(socket, make_server).await
}

/// Drive one WebSocket connection against a server built over its outbound
/// sink. Returns when the connection ends; shutdown handlers have been told
/// why by then.
pub async fn serve_websocket<S>(
    socket: WebSocketStream<S>,
    make_server: impl FnOnce(FrameSink) -> Server,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<WireFrame>();
    let server = make_server(outbound);

    let (mut write, mut read) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "outbound frame failed to serialize");
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let reason: Entry = loop {
        let message = match read.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                break ErrorEntry::new(
                    "reason",
                    "conn-failed",
                    AUTHORITY,
                    format!("websocket read failed: {}", err),
                )
                .into();
            }
            None => {
                break ErrorEntry::new("reason", "conn-closed", AUTHORITY, "websocket closed")
                    .into();
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<WireFrame>(&text) {
                Ok(frame) => {
                    // The sync half of receive_frame runs here, so queue
                    // order matches arrival order; the spawn only drives
                    // processing.
                    tokio::spawn(server.receive_frame(frame));
                }
                Err(err) => {
                    break ErrorEntry::new(
                        "reason",
                        "inbound-json-parse",
                        AUTHORITY,
                        format!("couldn't parse frame: {}", err),
                    )
                    .into();
                }
            },
            Message::Close(_) => {
                break ErrorEntry::new("reason", "conn-closed", AUTHORITY, "websocket closed")
                    .into();
            }
            // tungstenite answers pings itself; binary frames aren't part
            // of the protocol.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
    };

    server.handle_shutdown(Some(&reason));
    writer.abort();
    Ok(())
}
