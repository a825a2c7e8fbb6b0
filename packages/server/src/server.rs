//! The dispatch server: one instance per connection (or per embedded
//! namespace), processing requests in lockstep.
//!
//! Frames are enqueued synchronously in arrival order and processed one at
//! a time by a single drain loop, so responses on a connection always come
//! back in request order - even when an early handler is slow. Extensions
//! hook in through frame processors (claim a frame entirely), output
//! encoders (custom response framing), shutdown handlers, extra wire codecs,
//! and the channel factory.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;

use pathlink_api::{
    ChannelFactory, Entry, Environment, Error, Request, WireCodec, WireFrame, WireLiteral,
    WireRequest, WireResponse,
};

pub use pathlink_api::FrameSink;

use crate::core_ops;

type OpFuture = Pin<Box<dyn Future<Output = Result<Option<Entry>, Error>> + Send>>;

/// One registered operation.
pub type OpHandler = Arc<dyn Fn(Server, Request) -> OpFuture + Send + Sync>;

/// Wrap an async fn as an [`OpHandler`].
pub fn op_handler<F, Fut>(f: F) -> OpHandler
where
    F: Fn(Server, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Entry>, Error>> + Send + 'static,
{
    Arc::new(move |server, request| Box::pin(f(server, request)))
}

type FrameProcessor = Box<dyn Fn(&WireFrame) -> bool + Send + Sync>;
type ShutdownHandler = Box<dyn Fn(Option<&Entry>) + Send + Sync>;
type OutputEncoder = Box<dyn Fn(&Entry) -> Option<EncodedResponse> + Send + Sync>;

/// A response plus an optional follow-up to run once the response frame has
/// been sent (the inline-channel carrier starts its pump there, so packets
/// never overtake the response that announced the channel).
pub struct EncodedResponse {
    pub response: WireResponse,
    pub after: Option<Box<dyn FnOnce() + Send>>,
}

impl EncodedResponse {
    fn plain(response: WireResponse) -> Self {
        Self {
            response,
            after: None,
        }
    }
}

#[derive(Default)]
struct Lockstep {
    draining: bool,
    items: VecDeque<(WireRequest, oneshot::Sender<WireResponse>)>,
}

struct ServerState {
    env: Arc<Environment>,
    post: Option<FrameSink>,
    ops: RwLock<BTreeMap<String, OpHandler>>,
    frame_processors: RwLock<Vec<FrameProcessor>>,
    output_encoders: RwLock<Vec<OutputEncoder>>,
    shutdown_handlers: RwLock<Vec<ShutdownHandler>>,
    codec: RwLock<WireCodec>,
    channels: RwLock<Option<Arc<dyn ChannelFactory>>>,
    queue: Mutex<Lockstep>,
}

/// An extension that wires itself into a server's hook points.
pub trait ServerExtension {
    fn attach_to(&self, server: &Server) -> Result<(), Error>;
}

/// The request-dispatch server. Cheap to clone; clones share one instance.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    /// A server with no outbound sink: callers take responses from the
    /// `receive_frame` future (the stateless HTTP shape).
    pub fn new(env: Arc<Environment>) -> Self {
        Self::build(env, None)
    }

    /// A server attached to a connection's outbound sink. Responses are
    /// both posted through the sink and returned.
    pub fn with_post(env: Arc<Environment>, post: FrameSink) -> Self {
        Self::build(env, Some(post))
    }

    fn build(env: Arc<Environment>, post: Option<FrameSink>) -> Self {
        Self {
            state: Arc::new(ServerState {
                env,
                post,
                ops: RwLock::new(core_ops::core_ops()),
                frame_processors: RwLock::new(Vec::new()),
                output_encoders: RwLock::new(Vec::new()),
                shutdown_handlers: RwLock::new(Vec::new()),
                codec: RwLock::new(WireCodec::new()),
                channels: RwLock::new(None),
                queue: Mutex::new(Lockstep::default()),
            }),
        }
    }

    pub fn env(&self) -> Arc<Environment> {
        Arc::clone(&self.state.env)
    }

    pub fn attach(&self, extension: &dyn ServerExtension) -> Result<(), Error> {
        extension.attach_to(self)
    }

    // ---- extension hook points ----

    pub fn add_op(&self, name: impl Into<String>, handler: OpHandler) {
        self.state
            .ops
            .write()
            .expect("op table poisoned")
            .insert(name.into(), handler);
    }

    pub fn add_frame_processor(
        &self,
        processor: impl Fn(&WireFrame) -> bool + Send + Sync + 'static,
    ) {
        self.state
            .frame_processors
            .write()
            .expect("processor list poisoned")
            .push(Box::new(processor));
    }

    pub fn add_output_encoder(
        &self,
        encoder: impl Fn(&Entry) -> Option<EncodedResponse> + Send + Sync + 'static,
    ) {
        self.state
            .output_encoders
            .write()
            .expect("encoder list poisoned")
            .push(Box::new(encoder));
    }

    pub fn add_shutdown_handler(&self, handler: impl Fn(Option<&Entry>) + Send + Sync + 'static) {
        self.state
            .shutdown_handlers
            .write()
            .expect("shutdown list poisoned")
            .push(Box::new(handler));
    }

    pub fn add_inflater(
        &self,
        literal_type: impl Into<String>,
        inflater: impl Fn(&WireLiteral) -> Result<Entry, Error> + Send + Sync + 'static,
    ) {
        self.state
            .codec
            .write()
            .expect("codec poisoned")
            .add_inflater(literal_type, inflater);
    }

    pub fn add_deflater(
        &self,
        literal_type: impl Into<String>,
        deflater: impl Fn(&Entry) -> Result<WireLiteral, Error> + Send + Sync + 'static,
    ) {
        self.state
            .codec
            .write()
            .expect("codec poisoned")
            .add_deflater(literal_type, deflater);
    }

    pub fn set_channel_factory(&self, factory: Arc<dyn ChannelFactory>) {
        *self.state.channels.write().expect("factory slot poisoned") = Some(factory);
    }

    pub fn channel_factory(&self) -> Option<Arc<dyn ChannelFactory>> {
        self.state
            .channels
            .read()
            .expect("factory slot poisoned")
            .clone()
    }

    /// A snapshot of the codec with every registered extension.
    pub fn codec(&self) -> WireCodec {
        self.state.codec.read().expect("codec poisoned").clone()
    }

    /// The connection's outbound sink, when this server has one.
    pub fn frame_sink(&self) -> Option<FrameSink> {
        self.state.post.clone()
    }

    /// Post an unsolicited frame out the connection.
    pub fn post_frame(&self, frame: WireFrame) -> Result<(), Error> {
        let post = self
            .state
            .post
            .as_ref()
            .ok_or_else(|| Error::not_supported("post_frame"))?;
        post.send(frame)
            .map_err(|_| Error::transport("outbound sink is closed"))
    }

    /// Tell every shutdown handler the connection is going away.
    pub fn handle_shutdown(&self, reason: Option<&Entry>) {
        let handlers = self.state.shutdown_handlers.read().expect("shutdown list poisoned");
        for handler in handlers.iter() {
            handler(reason);
        }
    }

    // ---- frame intake ----

    /// Accept one inbound frame.
    ///
    /// The frame is claimed by an extension, or enqueued for lockstep
    /// processing, synchronously - callers that spawn the returned future
    /// still get arrival-order queueing. The future resolves with the
    /// response (None when an extension consumed the frame); when the
    /// server has an outbound sink the response is also posted there.
    pub fn receive_frame(
        &self,
        frame: WireFrame,
    ) -> impl Future<Output = Option<WireResponse>> + Send + 'static {
        let server = self.clone();
        let mut waiter = None;
        let mut drain = false;

        let consumed = {
            let processors = self
                .state
                .frame_processors
                .read()
                .expect("processor list poisoned");
            processors.iter().any(|processor| processor(&frame))
        };

        if !consumed {
            match frame {
                WireFrame::Request(request) => {
                    let (tx, rx) = oneshot::channel();
                    let mut queue = self.state.queue.lock().expect("lockstep queue poisoned");
                    queue.items.push_back((request, tx));
                    if !queue.draining {
                        queue.draining = true;
                        drain = true;
                    }
                    waiter = Some(rx);
                }
                WireFrame::Response(_) => {
                    tracing::warn!("dropping inbound response frame nobody claimed");
                }
            }
        }

        async move {
            let rx = waiter?;
            if drain {
                server.drain().await;
            }
            rx.await.ok()
        }
    }

    /// The lockstep worker: pull queued requests one at a time until the
    /// queue is empty, then go idle.
    async fn drain(&self) {
        loop {
            let item = {
                let mut queue = self.state.queue.lock().expect("lockstep queue poisoned");
                match queue.items.pop_front() {
                    Some(item) => item,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };

            let (request, reply) = item;
            let encoded = self.process_request(request).await;
            if let Some(post) = &self.state.post {
                let _ = post.send(encoded.response.clone().into());
            }
            let _ = reply.send(encoded.response);
            if let Some(after) = encoded.after {
                after();
            }
        }
    }

    /// Run one wire request through to a response envelope. Handler
    /// failures become `Ok: false`; they never break the loop.
    async fn process_request(&self, request: WireRequest) -> EncodedResponse {
        let op = request.op.clone();
        let result = self.perform_wire_request(request).await;
        match result {
            Ok(output) => self.encode_output(output),
            Err(err) => {
                tracing::warn!(op = %op, error = %err, "operation failed");
                EncodedResponse::plain(WireResponse::failure(err.to_string()))
            }
        }
    }

    async fn perform_wire_request(&self, request: WireRequest) -> Result<Option<Entry>, Error> {
        // Inflate the input first; reversal's Device rewriting rides on this.
        let input = match &request.input {
            Some(raw) => Some(self.codec().inflate(raw)?),
            None => None,
        };
        self.perform_operation(Request {
            op: request.op,
            path: request.path,
            dest: request.dest,
            input,
            depth: request.depth,
        })
        .await
    }

    /// Dispatch one inflated request. Returns the operation's output
    /// without a response envelope.
    pub async fn perform_operation(&self, request: Request) -> Result<Option<Entry>, Error> {
        tracing::debug!(
            op = %request.op,
            path = request.path.as_deref().unwrap_or("(no path)"),
            dest = request.dest.as_deref().unwrap_or("(no dest)"),
            "inbound operation"
        );

        let handler = {
            let ops = self.state.ops.read().expect("op table poisoned");
            ops.get(&request.op).cloned()
        };
        match handler {
            Some(handler) => handler(self.clone(), request).await,
            None => Err(Error::other(format!(
                "server doesn't implement {} operation",
                request.op
            ))),
        }
    }

    fn encode_output(&self, output: Option<Entry>) -> EncodedResponse {
        let Some(output) = output else {
            return EncodedResponse::plain(WireResponse::ok_empty());
        };

        // Extensions get first claim on custom framing.
        {
            let encoders = self
                .state
                .output_encoders
                .read()
                .expect("encoder list poisoned");
            for encoder in encoders.iter() {
                if let Some(encoded) = encoder(&output) {
                    return encoded;
                }
            }
        }

        match self.codec().deflate(&output) {
            Ok(literal) => EncodedResponse::plain(WireResponse::ok_output(literal)),
            Err(err) => {
                tracing::warn!(error = %err, "output failed to deflate");
                EncodedResponse::plain(WireResponse::failure(err.to_string()))
            }
        }
    }
}
