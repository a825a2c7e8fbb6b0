//! Serve a namespace to whoever holds the other end of a stream pair -
//! usually the process that spawned us, over stdin/stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::mpsc;

use pathlink_api::{Environment, Error, ErrorEntry, WireFrame};
use pathlink_reversal::ServerReversal;
use pathlink_server::{ChannelExtension, InlineChannelCarrier, Server};

use crate::frame::{decode_line, encode_line};

const AUTHORITY: &str = "pathlink/stdio";

/// One served connection over a byte-stream pair. Channels, inline
/// framing, and reversal are attached, so the host can subscribe and pass
/// live devices back.
pub struct Tenant<R> {
    server: Server,
    input: R,
}

impl Tenant<Stdin> {
    /// Serve on the process's own stdin/stdout.
    pub fn over_stdio(env: Arc<Environment>) -> Result<Self, Error> {
        Self::new(env, tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R> Tenant<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new<W>(env: Arc<Environment>, input: R, output: W) -> Result<Self, Error>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
        tokio::spawn(async move {
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

        let server = Server::with_post(env, sink);
        server.attach(&ChannelExtension::new())?;
        server.attach(&InlineChannelCarrier::new())?;
        server.attach(&ServerReversal::new())?;

        Ok(Self { server, input })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Read frames until the stream ends. Shutdown handlers learn why:
    /// `conn-closed` on a clean EOF, `inbound-json-parse` on a marked line
    /// that wasn't JSON.
    pub async fn run_loop(self) -> Result<(), Error> {
        let Tenant { server, input } = self;
        let mut lines = BufReader::new(input).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    server.handle_shutdown(Some(
                        &ErrorEntry::new(
                            "reason",
                            "conn-closed",
                            AUTHORITY,
                            "input stream was closed",
                        )
                        .into(),
                    ));
                    return Ok(());
                }
                Err(err) => {
                    server.handle_shutdown(Some(
                        &ErrorEntry::new(
                            "reason",
                            "conn-failed",
                            AUTHORITY,
                            format!("input read failed: {}", err),
                        )
                        .into(),
                    ));
                    return Err(err.into());
                }
            };

            match decode_line(&line) {
                Some(Ok(frame)) => {
                    // Enqueue synchronously, process in the background;
                    // arrival order is the lockstep order.
                    tokio::spawn(server.receive_frame(frame));
                }
                Some(Err(err)) => {
                    server.handle_shutdown(Some(
                        &ErrorEntry::new(
                            "reason",
                            "inbound-json-parse",
                            AUTHORITY,
                            format!("couldn't parse inbound frame: {}", err),
                        )
                        .into(),
                    ));
                    return Err(err);
                }
                None => {
                    if !line.is_empty() {
                        tracing::debug!(line = %line, "non-frame line on input");
                    }
                }
            }
        }
    }
}
