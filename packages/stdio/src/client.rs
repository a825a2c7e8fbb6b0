//! Client half of the line protocol: drive a namespace served on the other
//! end of a byte-stream pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pathlink_api::{Entry, Error, ErrorEntry, FrameSink, Request, Response, WireFrame};
use pathlink_client::{Client, ClientCore, ClientExtension, Correlator, InlineChannelClient};

use crate::frame::{decode_line, encode_line};

const AUTHORITY: &str = "pathlink/stdio";

/// Line-framed duplex client. Same correlation and extension machinery as
/// the WebSocket transport; only the byte framing differs.
pub struct StdioClient {
    core: ClientCore,
    correlator: Correlator,
    outbound: FrameSink,
    live: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioClient {
    /// Start reading frames from `input` and writing them to `output`.
    /// The inline-channel extension is attached by default.
    pub fn start<R, W>(input: R, output: W) -> Result<Arc<Self>, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
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
            let mut output = output;
            while let Some(frame) = outbound_rx.recv().await {
                let line = match encode_line(&frame) {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "outbound frame failed to serialize");
                        continue;
                    }
                };
                if output.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if output.flush().await.is_err() {
                    break;
                }
            }
        });

        let weak = Arc::downgrade(&client);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stop_via(&weak, "conn-closed", "peer output was closed");
                        break;
                    }
                    Err(err) => {
                        stop_via(&weak, "conn-failed", &format!("read failed: {}", err));
                        break;
                    }
                };
                match decode_line(&line) {
                    Some(Ok(frame)) => {
                        let Some(client) = weak.upgrade() else { break };
                        client.receive_frame(frame);
                    }
                    Some(Err(err)) => {
                        stop_via(
                            &weak,
                            "inbound-json-parse",
                            &format!("couldn't parse peer frame: {}", err),
                        );
                        break;
                    }
                    None => {
                        if !line.is_empty() {
                            tracing::debug!(line = %line, "peer diagnostic output");
                        }
                    }
                }
            }
        });

        {
            let mut tasks = client.tasks.lock().expect("task list poisoned");
            tasks.push(writer);
            tasks.push(reader);
        }
        Ok(client)
    }

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

    /// Tear the transport down and reject everything pending. Idempotent.
    pub fn stop(&self, reason: Option<Entry>) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        let reason = reason.unwrap_or_else(|| {
            ErrorEntry::new("reason", "stopped", AUTHORITY, "stdio transport was stopped").into()
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

fn stop_via(weak: &Weak<StdioClient>, code: &str, message: &str) {
    if let Some(client) = weak.upgrade() {
        client.stop(Some(
            ErrorEntry::new("reason", code, AUTHORITY, message).into(),
        ));
    }
}

#[async_trait]
impl Client for StdioClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn volley(&self, request: Request) -> Result<Response, Error> {
        if !self.live.load(Ordering::Acquire) {
            return Err(Error::transport("stdio transport is stopped"));
        }
        let wire = self.core.encode_request(&request)?;
        let waiter = self.correlator.expect();
        self.post_frame(wire.into())?;
        waiter
            .await
            .map_err(|_| Error::transport("stdio transport went away mid-request"))?
    }

    fn post_frame(&self, frame: WireFrame) -> Result<(), Error> {
        self.outbound
            .send(frame)
            .map_err(|_| Error::transport("stdio outbound sink is closed"))
    }

    fn frame_sink(&self) -> Option<FrameSink> {
        Some(self.outbound.clone())
    }
}
