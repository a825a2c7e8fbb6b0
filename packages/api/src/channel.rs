//! Channels - ordered, at-most-one-terminal async packet streams.
//!
//! A channel carries a live subscription. The producer half enqueues
//! packets with `handle()` (or the `next`/`error`/`done` shorthands); the
//! consumer half buffers them until someone starts reading and then
//! delivers them strictly in order, one at a time - a consumer callback
//! finishes before the next packet is handed over, so slow consumers stall
//! the stream rather than reorder it.
//!
//! Exactly one terminal packet (`Error` or `Done`) may ever pass through.
//! Anything after a terminal is a programming bug and fails loudly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::entry::Entry;
use crate::error::Error;

/// One packet on a channel. `Next` carries data; `Error` and `Done` are
/// terminal.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Next(Entry),
    Error(Option<Entry>),
    Done(Option<Entry>),
}

impl Packet {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Packet::Next(_))
    }

    /// The wire `Status` string for this packet.
    pub fn status(&self) -> &'static str {
        match self {
            Packet::Next(_) => "Next",
            Packet::Error(_) => "Error",
            Packet::Done(_) => "Done",
        }
    }

    pub fn output(&self) -> Option<&Entry> {
        match self {
            Packet::Next(e) => Some(e),
            Packet::Error(e) | Packet::Done(e) => e.as_ref(),
        }
    }

    /// Rebuild a packet from its wire pieces.
    pub fn from_wire(status: &str, output: Option<Entry>) -> Result<Packet, Error> {
        match status {
            "Next" => match output {
                Some(entry) => Ok(Packet::Next(entry)),
                None => Err(Error::malformed("Next packet without an Output")),
            },
            "Error" => Ok(Packet::Error(output)),
            "Done" => Ok(Packet::Done(output)),
            other => Err(Error::malformed(format!("unknown packet status {}", other))),
        }
    }
}

/// Create a connected producer/consumer pair.
pub fn channel(id: impl Into<String>) -> (ChannelSender, Channel) {
    let id = id.into();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSender {
            id: id.clone(),
            tx,
            closed: AtomicBool::new(false),
        },
        Channel {
            id,
            rx,
            finished: false,
        },
    )
}

/// Producer half of a channel.
pub struct ChannelSender {
    id: String,
    tx: mpsc::UnboundedSender<Packet>,
    closed: AtomicBool,
}

impl ChannelSender {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue a packet. Fails loudly on anything after a terminal.
    pub fn handle(&self, packet: Packet) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::protocol(format!(
                "channel {} received a {} packet after its terminal",
                self.id,
                packet.status()
            )));
        }
        if packet.is_terminal() {
            self.closed.store(true, Ordering::Release);
        }
        if self.tx.send(packet).is_err() {
            // Consumer went away; the subscription is already dead.
            tracing::debug!(channel = %self.id, "dropping packet for detached consumer");
        }
        Ok(())
    }

    pub fn next(&self, output: Entry) -> Result<(), Error> {
        self.handle(Packet::Next(output))
    }

    pub fn error(&self, output: Option<Entry>) -> Result<(), Error> {
        self.handle(Packet::Error(output))
    }

    pub fn done(&self, output: Option<Entry>) -> Result<(), Error> {
        self.handle(Packet::Done(output))
    }
}

/// Consumer half of a channel. Packets sent before the first `recv` are
/// buffered and replayed in order.
pub struct Channel {
    id: String,
    rx: mpsc::UnboundedReceiver<Packet>,
    finished: bool,
}

impl Channel {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next packet. Returns `None` once the terminal packet has
    /// been delivered (or the producer vanished without one).
    pub async fn recv(&mut self) -> Option<Packet> {
        if self.finished {
            return None;
        }
        let packet = self.rx.recv().await?;
        if packet.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(packet)
    }

    /// Drive every packet through `effect`, waiting for each call to finish
    /// before delivering the next. Resolves with the terminal packet's
    /// output once the stream ends.
    pub async fn for_each_packet<F, Fut>(mut self, mut effect: F) -> Option<Entry>
    where
        F: FnMut(Packet) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        while let Some(packet) = self.recv().await {
            let terminal = packet.is_terminal().then(|| packet.output().cloned());
            effect(packet).await;
            if let Some(output) = terminal {
                return output;
            }
        }
        None
    }

    /// Derive a channel whose `Next` entries are transformed. Terminals pass
    /// through unchanged.
    pub fn map(self, transform: impl Fn(Entry) -> Entry + Send + 'static) -> Channel {
        let (tx, out) = channel(format!("{}-map", self.id));
        tokio::spawn(async move {
            let mut source = self;
            while let Some(packet) = source.recv().await {
                let mapped = match packet {
                    Packet::Next(entry) => Packet::Next(transform(entry)),
                    terminal => terminal,
                };
                if tx.handle(mapped).is_err() {
                    break;
                }
            }
        });
        out
    }

    /// Derive a channel keeping only the `Next` entries the selector
    /// accepts. Terminals pass through unchanged.
    pub fn filter(self, select: impl Fn(&Entry) -> bool + Send + 'static) -> Channel {
        let (tx, out) = channel(format!("{}-filter", self.id));
        tokio::spawn(async move {
            let mut source = self;
            while let Some(packet) = source.recv().await {
                let keep = match &packet {
                    Packet::Next(entry) => select(entry),
                    _ => true,
                };
                if keep && tx.handle(packet).is_err() {
                    break;
                }
            }
        });
        out
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

/// Whether a stop has been requested for a subscription.
#[derive(Clone, Debug, Default)]
pub enum StopState {
    #[default]
    Running,
    Stopped(Option<Entry>),
}

/// The producer-facing face of an open subscription: emit packets, learn
/// about stop requests.
pub struct ServerChannel {
    sender: ChannelSender,
    stop: watch::Receiver<StopState>,
}

impl ServerChannel {
    pub fn new(sender: ChannelSender, stop: watch::Receiver<StopState>) -> Self {
        Self { sender, stop }
    }

    pub fn next(&self, output: Entry) -> Result<(), Error> {
        self.sender.next(output)
    }

    pub fn error(&self, output: Option<Entry>) -> Result<(), Error> {
        self.sender.error(output)
    }

    pub fn done(&self, output: Option<Entry>) -> Result<(), Error> {
        self.sender.done(output)
    }

    /// A clonable stop watcher, for use inside `select!` loops.
    pub fn stop_signal(&self) -> watch::Receiver<StopState> {
        self.stop.clone()
    }

    /// Wait until a stop is requested. Resolves with the stop reason; a
    /// vanished stop source counts as an unexplained stop.
    pub async fn stopped(&mut self) -> Option<Entry> {
        loop {
            if let StopState::Stopped(reason) = &*self.stop.borrow_and_update() {
                return reason.clone();
            }
            if self.stop.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Tears down a subscription at its source. The inline-channel client
/// round-trips a `stop` operation; local factories flip a watch.
#[async_trait]
pub trait ChannelStopper: Send + Sync {
    async fn stop(&self, reason: Option<Entry>) -> Result<(), Error>;
}

/// The Entry-embeddable face of an open channel: the consumable stream, its
/// small integer id, and an idempotent stop.
#[derive(Clone)]
pub struct ChannelEntry {
    pub name: String,
    pub id: u64,
    channel: Arc<Mutex<Option<Channel>>>,
    stopper: Arc<dyn ChannelStopper>,
    stop_sent: Arc<AtomicBool>,
}

impl ChannelEntry {
    pub fn new(
        name: impl Into<String>,
        id: u64,
        channel: Channel,
        stopper: Arc<dyn ChannelStopper>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            channel: Arc::new(Mutex::new(Some(channel))),
            stopper,
            stop_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the consumer half. Only the first caller gets it.
    pub fn take_channel(&self) -> Option<Channel> {
        self.channel.lock().ok()?.take()
    }

    /// Ask the producer to stop. Later calls are no-ops.
    pub async fn stop(&self, reason: Option<Entry>) -> Result<(), Error> {
        if self.stop_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stopper.stop(reason).await
    }
}

impl std::fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ChannelEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.channel, &other.channel)
    }
}

/// Sets up the producer side of a new subscription channel.
pub type Producer = Box<dyn FnOnce(ServerChannel) + Send>;

/// Allocates channels for subscription sources. The wire-facing factory
/// lives in the server's channel extension; `LocalChannels` covers
/// in-process subscriptions.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, producer: Producer) -> Result<ChannelEntry, Error>;
}

/// In-process channel factory with no wire framing.
#[derive(Default)]
pub struct LocalChannels {
    next_id: AtomicU64,
}

impl LocalChannels {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelFactory for LocalChannels {
    async fn open(&self, producer: Producer) -> Result<ChannelEntry, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, consumer) = channel(format!("local-{}", id));
        let (stop_tx, stop_rx) = watch::channel(StopState::Running);
        producer(ServerChannel::new(sender, stop_rx));
        Ok(ChannelEntry::new(
            "channel",
            id,
            consumer,
            Arc::new(LocalStopper { tx: stop_tx }),
        ))
    }
}

/// Stops a locally-made channel by flipping its stop watch.
pub struct LocalStopper {
    tx: watch::Sender<StopState>,
}

impl LocalStopper {
    pub fn new(tx: watch::Sender<StopState>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChannelStopper for LocalStopper {
    async fn stop(&self, reason: Option<Entry>) -> Result<(), Error> {
        let _ = self.tx.send(StopState::Stopped(reason));
        Ok(())
    }
}
