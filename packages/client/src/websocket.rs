//! Persistent duplex transport over a WebSocket.
//!
//! One spawned task reads frames off the socket, one drains the outbound
//! sink into it, and one volleys a keepalive ping on an interval. Pending
//! requests resolve strictly FIFO. When the socket goes away the client
//! fails fast: every pending request is rejected, shutdown handlers fire,
//! and nothing reconnects behind the caller's back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use pathlink_api::{Entry, Error, ErrorEntry, FrameSink, Request, Response, WireFrame};

use crate::channels::InlineChannelClient;
use crate::client::{Client, ClientCore, ClientExtension, Correlator};

const AUTHORITY: &str = "pathlink/client";

/// Client over a live WebSocket. Construct with [`WebSocketClient::connect`];
/// the inline-channel extension is attached by default.
pub struct WebSocketClient {
    core: ClientCore,
    correlator: Correlator,
    outbound: FrameSink,
    live: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketClient {
    /// Connect with the default 30s keepalive interval.
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>, Error> {
        Self::connect_with(endpoint, Duration::from_secs(30)).await
    }

    pub async fn connect_with(
        endpoint: &str,
        ping_interval: Duration,
    ) -> Result<Arc<Self>, Error> {
        tracing::debug!(endpoint, "starting websocket transport");
        let (socket, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| Error::transport(format!("websocket connect failed: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
        let client = Arc::new(Self {
            core: ClientCore::new(),
            correlator: Correlator::new(),
            outbound,
            live: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });

        let as_client: Arc<dyn Client> = client.clone();
        InlineChannelClient::new().attach_to(&as_client)?;

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

        let weak = Arc::downgrade(&client);
        let reader = tokio::spawn(async move {
            loop {
                let message = match read.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        stop_via(&weak, "conn-failed", &format!("websocket failed: {}", err));
                        break;
                    }
                    None => {
                        stop_via(&weak, "conn-closed", "websocket closed");
                        break;
                    }
                };
                let Some(client) = weak.upgrade() else { break };
                match message {
                    Message::Text(text) => match serde_json::from_str::<WireFrame>(&text) {
                        Ok(frame) => client.receive_frame(frame),
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping unparseable frame");
                        }
                    },
                    Message::Close(_) => {
                        stop_via(&weak, "conn-closed", "websocket closed");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                }
            }
        });

        let weak = Arc::downgrade(&client);
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else { break };
                if !client.live.load(Ordering::Acquire) {
                    break;
                }
                if let Err(err) = client.perform_op(Request::new("ping")).await {
                    tracing::debug!(error = %err, "keepalive ping failed");
                    break;
                }
            }
        });

        {
            let mut tasks = client.tasks.lock().expect("task list poisoned");
            tasks.push(writer);
            tasks.push(reader);
            tasks.push(keepalive);
        }
        Ok(client)
    }

    /// Route one inbound frame: extensions first, then the FIFO pairing.
    fn receive_frame(&self, frame: WireFrame) {
        if self.core.process_incoming(&frame) {
            return;
        }
        match frame {
            WireFrame::Response(wire) => {
                let decoded = self.core.decode_response(&wire);
                if let Err(err) = self.correlator.resolve(decoded) {
                    tracing::error!(error = %err, "inbound response had no waiting request");
                }
            }
            WireFrame::Request(_) => {
                tracing::warn!("inbound request frame ignored; reversal is not attached");
            }
        }
    }

    /// Tear the transport down: reject all pending requests, notify
    /// shutdown handlers, stop the background tasks. Idempotent.
    pub fn stop(&self, reason: Option<Entry>) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("shutting down websocket transport");

        let reason = reason.unwrap_or_else(|| {
            ErrorEntry::new("reason", "stopped", AUTHORITY, "websocket transport was stopped")
                .into()
        });
        let detail = match &reason {
            Entry::Error(e) => e.message.clone(),
            Entry::String(s) => s.value.clone(),
            other => other.type_name().to_string(),
        };
        self.correlator.fail_all(&format!("interrupted: {}", detail));
        self.core.handle_shutdown(Some(&reason));

        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

fn stop_via(weak: &Weak<WebSocketClient>, code: &str, message: &str) {
    if let Some(client) = weak.upgrade() {
        client.stop(Some(
            ErrorEntry::new("reason", code, AUTHORITY, message).into(),
        ));
    }
}

#[async_trait]
impl Client for WebSocketClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn volley(&self, request: Request) -> Result<Response, Error> {
        if !self.live.load(Ordering::Acquire) {
            return Err(Error::transport("websocket transport is stopped"));
        }
        let wire = self.core.encode_request(&request)?;
        let waiter = self.correlator.expect();
        self.post_frame(wire.into())?;
        waiter
            .await
            .map_err(|_| Error::transport("websocket transport went away mid-request"))?
    }

    fn post_frame(&self, frame: WireFrame) -> Result<(), Error> {
        self.outbound
            .send(frame)
            .map_err(|_| Error::transport("websocket outbound sink is closed"))
    }

    fn frame_sink(&self) -> Option<FrameSink> {
        Some(self.outbound.clone())
    }
}
