//! Channel support for a server: id allocation, the `stop` op, and the
//! inline carrier that multiplexes channel packets over the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use pathlink_api::{
    channel, Channel, ChannelEntry, ChannelFactory, ChannelStopper, Entry, Error, Producer,
    ServerChannel, StopState, WireCodec, WireResponse,
};

use crate::server::{op_handler, EncodedResponse, FrameSink, Server, ServerExtension};

/// Provides the channel factory, the `stop` op (path `/chan/<id>`), and
/// shutdown teardown. Ids and the open-channel count are fields of this
/// instance, readable through [`ChannelExtension::open_channels`].
#[derive(Default)]
pub struct ChannelExtension {
    registry: Arc<ChannelRegistry>,
}

impl ChannelExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many channels this server currently has open.
    pub fn open_channels(&self) -> usize {
        self.registry.len()
    }
}

impl ServerExtension for ChannelExtension {
    fn attach_to(&self, server: &Server) -> Result<(), Error> {
        server.set_channel_factory(Arc::clone(&self.registry) as Arc<dyn ChannelFactory>);

        let registry = Arc::clone(&self.registry);
        server.add_op(
            "stop",
            op_handler(move |_server, request| {
                let registry = Arc::clone(&registry);
                async move {
                    let path = request
                        .path
                        .clone()
                        .ok_or_else(|| Error::malformed("Path is required"))?;
                    let id = parse_channel_path(&path)?;
                    let reason = request
                        .input
                        .clone()
                        .unwrap_or_else(|| Entry::string("reason", "client called stop"));
                    if !registry.trigger_stop(id, Some(reason)) {
                        return Err(Error::not_found(path));
                    }
                    Ok(None)
                }
            }),
        );

        let registry = Arc::clone(&self.registry);
        server.add_shutdown_handler(move |reason| {
            let reason =
                reason.cloned().unwrap_or_else(|| Entry::string("reason", "server is shutting down"));
            registry.stop_all(Some(reason));
        });

        Ok(())
    }
}

fn parse_channel_path(path: &str) -> Result<u64, Error> {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(""), Some("chan"), Some(id)) => id
            .parse()
            .map_err(|_| Error::malformed(format!("bad channel id in {}", path))),
        _ => Err(Error::malformed(format!(
            "expected a /chan/<id> path, got {}",
            path
        ))),
    }
}

/// Owns the id -> channel bookkeeping for one server.
#[derive(Default)]
pub struct ChannelRegistry {
    next_id: AtomicU64,
    open: Arc<Mutex<HashMap<u64, watch::Sender<StopState>>>>,
}

impl ChannelRegistry {
    fn len(&self) -> usize {
        self.open.lock().expect("channel registry poisoned").len()
    }

    fn trigger_stop(&self, id: u64, reason: Option<Entry>) -> bool {
        let open = self.open.lock().expect("channel registry poisoned");
        match open.get(&id) {
            Some(stop) => {
                let _ = stop.send(StopState::Stopped(reason));
                true
            }
            None => false,
        }
    }

    fn stop_all(&self, reason: Option<Entry>) {
        let mut open = self.open.lock().expect("channel registry poisoned");
        for (_, stop) in open.drain() {
            let _ = stop.send(StopState::Stopped(reason.clone()));
        }
    }
}

#[async_trait]
impl ChannelFactory for ChannelRegistry {
    async fn open(&self, producer: Producer) -> Result<ChannelEntry, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, mut internal) = channel(format!("wire-{}", id));
        let (relay, consumer) = channel(format!("wire-{}-out", id));
        let (stop_tx, stop_rx) = watch::channel(StopState::Running);

        self.open
            .lock()
            .expect("channel registry poisoned")
            .insert(id, stop_tx);

        // Relay packets so the registry entry goes away at the terminal no
        // matter what the consumer does with the stream.
        let open = Arc::clone(&self.open);
        tokio::spawn(async move {
            while let Some(packet) = internal.recv().await {
                let terminal = packet.is_terminal();
                if relay.handle(packet).is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
            open.lock().expect("channel registry poisoned").remove(&id);
        });

        producer(ServerChannel::new(sender, stop_rx));

        Ok(ChannelEntry::new(
            "channel",
            id,
            consumer,
            Arc::new(RegistryStopper {
                open: Arc::clone(&self.open),
                id,
            }),
        ))
    }
}

struct RegistryStopper {
    open: Arc<Mutex<HashMap<u64, watch::Sender<StopState>>>>,
    id: u64,
}

#[async_trait]
impl ChannelStopper for RegistryStopper {
    async fn stop(&self, reason: Option<Entry>) -> Result<(), Error> {
        let open = self.open.lock().expect("channel registry poisoned");
        if let Some(stop) = open.get(&self.id) {
            let _ = stop.send(StopState::Stopped(reason));
        }
        Ok(())
    }
}

/// Folds a Channel output into `{Ok, Status:"Ok", Chan:id}` and then
/// delivers every packet as its own `Chan`-tagged frame over the same
/// connection - one request, unbounded follow-ups, one socket.
pub struct InlineChannelCarrier;

impl InlineChannelCarrier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InlineChannelCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerExtension for InlineChannelCarrier {
    fn attach_to(&self, server: &Server) -> Result<(), Error> {
        let sink = server.frame_sink().ok_or_else(|| {
            Error::other("only connections with an outbound sink can carry inline channels")
        })?;

        server.add_output_encoder(move |entry| {
            let Entry::Channel(channel_entry) = entry else {
                return None;
            };
            let Some(consumer) = channel_entry.take_channel() else {
                tracing::warn!(id = channel_entry.id, "channel output already claimed");
                return None;
            };
            let id = channel_entry.id;
            let sink = sink.clone();
            Some(EncodedResponse {
                response: WireResponse {
                    ok: true,
                    output: None,
                    chan: Some(id),
                    status: Some("Ok".to_string()),
                },
                // Packets only start flowing after the announcing response
                // has been queued, so they can never overtake it.
                after: Some(Box::new(move || plumb(consumer, sink, id))),
            })
        });
        Ok(())
    }
}

fn plumb(consumer: Channel, sink: FrameSink, id: u64) {
    tokio::spawn(async move {
        let codec = WireCodec::new();
        let mut consumer = consumer;
        while let Some(packet) = consumer.recv().await {
            let output = match packet.output() {
                Some(entry) => match codec.deflate(entry) {
                    Ok(literal) => Some(literal),
                    Err(err) => {
                        tracing::warn!(chan = id, error = %err, "channel packet failed to deflate");
                        let substitute = Entry::from(pathlink_api::ErrorEntry::new(
                            "undeliverable",
                            "deflate-failed",
                            "pathlink/server",
                            err.to_string(),
                        ));
                        codec.deflate(&substitute).ok()
                    }
                },
                None => None,
            };
            let frame = WireResponse {
                ok: true,
                output,
                chan: Some(id),
                status: Some(packet.status().to_string()),
            };
            if sink.send(frame.into()).is_err() {
                break;
            }
        }
    });
}
