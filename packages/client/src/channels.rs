//! Client half of inline channels: recognizes `Chan` on responses and
//! routes later `Chan`-tagged frames to the right local channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use pathlink_api::{
    channel, ChannelEntry, ChannelSender, ChannelStopper, Entry, Error, Packet, Request,
    WireCodec, WireFrame,
};

use crate::client::{Client, ClientExtension};

/// Turns `{Chan: id}` responses into live Channel entries and feeds every
/// later packet frame for that id into them. Attached by default on duplex
/// transports.
pub struct InlineChannelClient;

impl InlineChannelClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InlineChannelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientExtension for InlineChannelClient {
    fn attach_to(&self, client: &Arc<dyn Client>) -> Result<(), Error> {
        let channels: Arc<Mutex<HashMap<u64, ChannelSender>>> = Arc::default();

        // New channels: a response with Chan and Status "Ok".
        let registry = Arc::clone(&channels);
        let weak = Arc::downgrade(client);
        client.core().add_output_decoder(move |wire| {
            if wire.status.as_deref() != Some("Ok") {
                return None;
            }
            let id = wire.chan?;
            tracing::debug!(chan = id, "received a new inline channel");

            let (sender, consumer) = channel(format!("wire-{}", id));
            registry
                .lock()
                .expect("channel map poisoned")
                .insert(id, sender);
            Some(Entry::Channel(ChannelEntry::new(
                "channel",
                id,
                consumer,
                Arc::new(StopOverWire {
                    client: weak.clone(),
                    id,
                }),
            )))
        });

        // Continuations: any frame with Chan and a packet status.
        let registry = Arc::clone(&channels);
        client.core().add_frame_processor(move |frame| {
            let WireFrame::Response(wire) = frame else {
                return false;
            };
            let Some(id) = wire.chan else { return false };
            let status = wire.status.as_deref().unwrap_or("");
            if !matches!(status, "Next" | "Error" | "Done") {
                return false;
            }

            let mut map = registry.lock().expect("channel map poisoned");
            let Some(sender) = map.get(&id) else {
                // A packet for a channel we never opened is a wiring bug.
                tracing::error!(chan = id, "received an unroutable channel packet");
                return true;
            };

            let output = wire
                .output
                .as_ref()
                .map(|raw| WireCodec::new().inflate(raw))
                .transpose()
                .unwrap_or_else(|err| {
                    tracing::warn!(chan = id, error = %err, "channel packet failed to inflate");
                    None
                });
            match Packet::from_wire(status, output) {
                Ok(packet) => {
                    if let Err(err) = sender.handle(packet) {
                        tracing::error!(chan = id, error = %err, "channel refused a packet");
                    }
                }
                // A Next without an Output carries nothing; skip it.
                Err(err) => tracing::debug!(chan = id, error = %err, "dropping packet"),
            }

            if status != "Next" {
                map.remove(&id);
            }
            true
        });

        // Transport teardown errors out every open channel.
        let registry = Arc::clone(&channels);
        client.core().add_shutdown_handler(move |reason| {
            let mut map = registry.lock().expect("channel map poisoned");
            for (_, sender) in map.drain() {
                let _ = sender.error(reason.cloned());
            }
        });

        Ok(())
    }
}

/// Stops a remote subscription by round-tripping the `stop` op.
struct StopOverWire {
    client: Weak<dyn Client>,
    id: u64,
}

#[async_trait]
impl ChannelStopper for StopOverWire {
    async fn stop(&self, reason: Option<Entry>) -> Result<(), Error> {
        let client = self
            .client
            .upgrade()
            .ok_or_else(|| Error::transport("client is gone, cannot stop channel"))?;
        let mut request = Request::new("stop").with_path(format!("/chan/{}", self.id));
        if let Some(reason) = reason {
            request = request.with_input(reason);
        }
        client.perform_op(request).await.map(|_| ())
    }
}
