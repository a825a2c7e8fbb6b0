//! # pathlink-reversal
//!
//! Full-duplex RPC over one connection. A frame carrying `Op` is a request,
//! a frame without one is a response - so either end can run both a server
//! and a client on the same socket:
//!
//! - [`ServerReversal`] gives the answering side a private client whose
//!   requests go back out the connection's sink, and rewrites inbound
//!   `Device` literals into live remote references.
//! - [`ClientReversal`] gives the asking side a private server for inbound
//!   requests, and rewrites outgoing live devices into `ReversalPrefix`
//!   wire shapes re-exposed under `/pub/<n>`.
//!
//! Passing a capability, not just data, works in both directions without a
//! second socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use pathlink_api::{
    DeviceEntry, Entry, Environment, Error, FrameSink, Request, Response, WireFrame, WireLiteral,
};
use pathlink_api::devices::NullDevice;
use pathlink_client::{
    Client, ClientCore, ClientExtension, Correlator, InlineChannelClient, RemoteDevice,
};
use pathlink_server::{ChannelExtension, InlineChannelCarrier, Server, ServerExtension};

/// The answering side's private client: requests go out the server's sink,
/// responses come back through the server's frame processors.
pub struct ReversedClient {
    core: ClientCore,
    correlator: Correlator,
    post: FrameSink,
}

impl ReversedClient {
    fn new(post: FrameSink) -> Self {
        Self {
            core: ClientCore::new(),
            correlator: Correlator::new(),
            post,
        }
    }

    /// Route one inbound frame that the host server handed over.
    fn receive_frame(&self, frame: &WireFrame) {
        if self.core.process_incoming(frame) {
            return;
        }
        if let WireFrame::Response(wire) = frame {
            let decoded = self.core.decode_response(wire);
            if let Err(err) = self.correlator.resolve(decoded) {
                tracing::error!(error = %err, "reversed response had no waiting request");
            }
        }
    }
}

#[async_trait]
impl Client for ReversedClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn volley(&self, request: Request) -> Result<Response, Error> {
        let wire = self.core.encode_request(&request)?;
        let waiter = self.correlator.expect();
        self.post
            .send(wire.into())
            .map_err(|_| Error::transport("connection sink is closed"))?;
        waiter
            .await
            .map_err(|_| Error::transport("connection went away mid-request"))?
    }

    fn post_frame(&self, frame: WireFrame) -> Result<(), Error> {
        self.post
            .send(frame)
            .map_err(|_| Error::transport("connection sink is closed"))
    }

    fn frame_sink(&self) -> Option<FrameSink> {
        Some(self.post.clone())
    }
}

/// Server extension: intercept response frames for the reversed client and
/// inflate `Device` literals into live remote references over it.
pub struct ServerReversal {
    client_extensions: Vec<Box<dyn ClientExtension>>,
}

impl ServerReversal {
    /// Reversal with inline-channel support on the reversed client.
    pub fn new() -> Self {
        Self::with_extensions(vec![Box::new(InlineChannelClient::new())])
    }

    pub fn with_extensions(client_extensions: Vec<Box<dyn ClientExtension>>) -> Self {
        Self { client_extensions }
    }
}

impl Default for ServerReversal {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerExtension for ServerReversal {
    fn attach_to(&self, server: &Server) -> Result<(), Error> {
        let sink = server
            .frame_sink()
            .ok_or_else(|| Error::other("only connections with an outbound sink can use reversal"))?;

        let reversed = Arc::new(ReversedClient::new(sink));
        let as_client: Arc<dyn Client> = reversed.clone();
        for extension in &self.client_extensions {
            extension.attach_to(&as_client)?;
        }

        // Frames without an Op were never meant for the server; they are
        // answers (or channel packets) for the reversed client.
        let routed = Arc::clone(&reversed);
        server.add_frame_processor(move |frame| {
            if frame.as_response().is_none() {
                return false;
            }
            routed.receive_frame(frame);
            true
        });

        // A Device literal arriving here names a prefix the far side
        // re-exposed; reconstruct a live reference pointed at it.
        let for_devices: Arc<dyn Client> = reversed;
        server.add_inflater("Device", move |raw| {
            let prefix = raw.extra_str("ReversalPrefix").ok_or_else(|| {
                Error::malformed("only Devices with a ReversalPrefix can cross the wire")
            })?;
            let name = raw.name.clone().unwrap_or_default();
            Ok(Entry::Device(DeviceEntry::new(
                name,
                Arc::new(RemoteDevice::new(Arc::clone(&for_devices), prefix)),
            )))
        });

        Ok(())
    }
}

/// Client extension: run a private server for inbound requests, and bind
/// each outgoing live Device under a freshly minted `/pub/<n>` prefix.
pub struct ClientReversal {
    env: Arc<Environment>,
    server_extensions: Vec<Box<dyn ServerExtension>>,
    next_pub: Arc<AtomicU64>,
}

impl ClientReversal {
    /// Reversal whose private server carries full channel support.
    pub fn new() -> Result<Self, Error> {
        Self::with_extensions(vec![
            Box::new(ChannelExtension::new()),
            Box::new(InlineChannelCarrier::new()),
        ])
    }

    pub fn with_extensions(server_extensions: Vec<Box<dyn ServerExtension>>) -> Result<Self, Error> {
        let env = Arc::new(Environment::new());
        // Offer nothing at /pub itself; this masks the exposed-device list
        // from enumeration without hiding the devices beneath it.
        env.bind("/pub", Arc::new(NullDevice))?;
        Ok(Self {
            env,
            server_extensions,
            next_pub: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The private server's namespace, for anything the caller wants to
    /// expose beyond passed devices.
    pub fn env(&self) -> Arc<Environment> {
        Arc::clone(&self.env)
    }
}

impl ClientExtension for ClientReversal {
    fn attach_to(&self, client: &Arc<dyn Client>) -> Result<(), Error> {
        let sink = client
            .frame_sink()
            .ok_or_else(|| Error::other("only duplex clients can use reversal"))?;

        let embedded = Server::with_post(Arc::clone(&self.env), sink);
        for extension in &self.server_extensions {
            embedded.attach(extension.as_ref())?;
        }

        // Frames carrying an Op are requests for our private server. The
        // enqueue half of receive_frame runs synchronously here, so
        // reversed requests keep their arrival order.
        let route = embedded.clone();
        client.core().add_frame_processor(move |frame| {
            if frame.as_request().is_none() {
                return false;
            }
            tokio::spawn(route.receive_frame(frame.clone()));
            true
        });

        // Outgoing live devices: bind under /pub/<n> and send the prefix.
        let env = Arc::clone(&self.env);
        let next_pub = Arc::clone(&self.next_pub);
        client.core().add_deflater("Device", move |entry| {
            let Entry::Device(device_entry) = entry else {
                return Err(Error::protocol("Device deflater got a non-Device entry"));
            };
            let prefix = format!("/pub/{}", next_pub.fetch_add(1, Ordering::SeqCst));
            env.bind(&prefix, device_entry.device())?;

            let mut literal = WireLiteral::of_type("Device");
            literal.name = Some(device_entry.name.clone());
            literal.extra.insert(
                "ReversalPrefix".to_string(),
                serde_json::Value::String(prefix),
            );
            Ok(literal)
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn server_reversal_needs_a_sink() {
        let server = Server::new(Arc::new(Environment::new()));
        assert!(server.attach(&ServerReversal::new()).is_err());
    }

    #[tokio::test]
    async fn device_literal_without_prefix_is_rejected() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let server = Server::with_post(Arc::new(Environment::new()), sink);
        server.attach(&ServerReversal::new()).unwrap();

        let raw = WireLiteral::of_type("Device");
        let result = server.codec().inflate(&raw);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[tokio::test]
    async fn pub_prefixes_count_up_per_instance() {
        let reversal = ClientReversal::new().unwrap();
        let env = reversal.env();

        // Two bound devices land at /pub/0 and /pub/1 once deflated; the
        // counter is on this instance, not process-wide.
        assert_eq!(reversal.next_pub.load(Ordering::SeqCst), 0);
        assert!(env.mounts().contains(&"/pub".to_string()));
    }
}
