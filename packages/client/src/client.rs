//! The client contract and the pieces every transport shares.
//!
//! A transport implements `volley`: serialize one request, send it, and
//! resolve it against the connection's pending-receiver queue in strict
//! FIFO order - transports with one frame in flight at a time rely on that
//! to pair each inbound frame with the oldest outstanding request.
//! `perform_op` wraps `volley` and unwraps `Ok: false` into a typed
//! rejection built from the Output entry.

use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use pathlink_api::{
    Entry, Error, FrameSink, Request, Response, WireCodec, WireFrame, WireLiteral, WireRequest,
    WireResponse,
};

type OutputDecoder = Box<dyn Fn(&WireResponse) -> Option<Entry> + Send + Sync>;
type FrameProcessor = Box<dyn Fn(&WireFrame) -> bool + Send + Sync>;
type ShutdownHandler = Box<dyn Fn(Option<&Entry>) + Send + Sync>;

/// Extension points shared by every client transport: custom output
/// decoding (inline channels), whole-frame interception (channel packets,
/// reversal), shutdown notification, and the extra wire codecs.
#[derive(Default)]
pub struct ClientCore {
    codec: RwLock<WireCodec>,
    output_decoders: RwLock<Vec<OutputDecoder>>,
    frame_processors: RwLock<Vec<FrameProcessor>>,
    shutdown_handlers: RwLock<Vec<ShutdownHandler>>,
}

impl ClientCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output_decoder(
        &self,
        decoder: impl Fn(&WireResponse) -> Option<Entry> + Send + Sync + 'static,
    ) {
        self.output_decoders
            .write()
            .expect("decoder list poisoned")
            .push(Box::new(decoder));
    }

    pub fn add_frame_processor(
        &self,
        processor: impl Fn(&WireFrame) -> bool + Send + Sync + 'static,
    ) {
        self.frame_processors
            .write()
            .expect("processor list poisoned")
            .push(Box::new(processor));
    }

    pub fn add_shutdown_handler(&self, handler: impl Fn(Option<&Entry>) + Send + Sync + 'static) {
        self.shutdown_handlers
            .write()
            .expect("shutdown list poisoned")
            .push(Box::new(handler));
    }

    pub fn add_inflater(
        &self,
        literal_type: impl Into<String>,
        inflater: impl Fn(&WireLiteral) -> Result<Entry, Error> + Send + Sync + 'static,
    ) {
        self.codec
            .write()
            .expect("codec poisoned")
            .add_inflater(literal_type, inflater);
    }

    pub fn add_deflater(
        &self,
        literal_type: impl Into<String>,
        deflater: impl Fn(&Entry) -> Result<WireLiteral, Error> + Send + Sync + 'static,
    ) {
        self.codec
            .write()
            .expect("codec poisoned")
            .add_deflater(literal_type, deflater);
    }

    /// Serialize a request, deflating its Input through the extras.
    pub fn encode_request(&self, request: &Request) -> Result<WireRequest, Error> {
        let input = match &request.input {
            Some(entry) => Some(self.codec.read().expect("codec poisoned").deflate(entry)?),
            None => None,
        };
        Ok(WireRequest {
            op: request.op.clone(),
            path: request.path.clone(),
            dest: request.dest.clone(),
            input,
            depth: request.depth,
        })
    }

    /// Decode a response. Extensions may claim the whole output (that is
    /// how `Chan` responses become Channel entries); otherwise the Output
    /// literal inflates through the extras.
    pub fn decode_response(&self, wire: &WireResponse) -> Result<Response, Error> {
        {
            let decoders = self.output_decoders.read().expect("decoder list poisoned");
            for decoder in decoders.iter() {
                if let Some(entry) = decoder(wire) {
                    return Ok(Response {
                        ok: wire.ok,
                        output: Some(entry),
                        status: wire.status.clone(),
                    });
                }
            }
        }

        let output = match &wire.output {
            Some(raw) => Some(self.codec.read().expect("codec poisoned").inflate(raw)?),
            None => None,
        };
        Ok(Response {
            ok: wire.ok,
            output,
            status: wire.status.clone(),
        })
    }

    /// Offer an inbound frame to the processors. `true` means claimed.
    pub fn process_incoming(&self, frame: &WireFrame) -> bool {
        let processors = self
            .frame_processors
            .read()
            .expect("processor list poisoned");
        processors.iter().any(|processor| processor(frame))
    }

    pub fn handle_shutdown(&self, reason: Option<&Entry>) {
        let handlers = self
            .shutdown_handlers
            .read()
            .expect("shutdown list poisoned");
        for handler in handlers.iter() {
            handler(reason);
        }
    }
}

/// The human-readable detail for an `Ok: false` response.
pub fn rejection_message(output: Option<&Entry>) -> String {
    match output {
        None => "no error was returned".to_string(),
        Some(Entry::String(s)) => s.value.clone(),
        Some(Entry::Error(e)) => format!("{} ({})", e.message, e.code),
        Some(other) => format!("odd output type {}", other.type_name()),
    }
}

/// One end of a request/response conversation.
#[async_trait]
pub trait Client: Send + Sync {
    fn core(&self) -> &ClientCore;

    /// Send one request frame and resolve its response frame. No judgement
    /// is passed on the response itself.
    async fn volley(&self, request: Request) -> Result<Response, Error>;

    /// Duplex transports: push a raw frame out the connection.
    fn post_frame(&self, _frame: WireFrame) -> Result<(), Error> {
        Err(Error::not_supported("post_frame"))
    }

    /// Duplex transports: the outbound sink itself, for embedding a server
    /// on this side of the connection.
    fn frame_sink(&self) -> Option<FrameSink> {
        None
    }

    /// Like `volley`, but checks the response and returns the Output
    /// directly; `Ok: false` becomes a typed rejection.
    async fn perform_op(&self, request: Request) -> Result<Option<Entry>, Error> {
        let op = request.op.clone();
        let response = self.volley(request).await?;
        if response.ok {
            Ok(response.output)
        } else {
            Err(Error::Rejected {
                op,
                message: rejection_message(response.output.as_ref()),
            })
        }
    }
}

/// An extension that wires itself into a client's hook points.
pub trait ClientExtension {
    fn attach_to(&self, client: &std::sync::Arc<dyn Client>) -> Result<(), Error>;
}

/// Pairs inbound response frames with outstanding requests, oldest first.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<VecDeque<tokio::sync::oneshot::Sender<Result<Response, Error>>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a receiver for the next unclaimed inbound response.
    pub fn expect(&self) -> tokio::sync::oneshot::Receiver<Result<Response, Error>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending
            .lock()
            .expect("pending queue poisoned")
            .push_back(tx);
        rx
    }

    /// Hand an inbound response to the oldest outstanding request.
    pub fn resolve(&self, response: Result<Response, Error>) -> Result<(), Error> {
        let receiver = self
            .pending
            .lock()
            .expect("pending queue poisoned")
            .pop_front();
        match receiver {
            Some(tx) => {
                let _ = tx.send(response);
                Ok(())
            }
            None => Err(Error::protocol("received a payload without a receiver")),
        }
    }

    /// Reject everything outstanding, e.g. when the transport dies.
    pub fn fail_all(&self, message: &str) {
        let mut pending = self.pending.lock().expect("pending queue poisoned");
        for tx in pending.drain(..) {
            let _ = tx.send(Err(Error::transport(message.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correlator_resolves_fifo() {
        let correlator = Correlator::new();
        let rx1 = correlator.expect();
        let rx2 = correlator.expect();

        correlator
            .resolve(Ok(Response {
                ok: true,
                output: Some(Entry::string("first", "")),
                status: None,
            }))
            .unwrap();
        correlator
            .resolve(Ok(Response {
                ok: false,
                output: None,
                status: None,
            }))
            .unwrap();

        let first = rx1.await.unwrap().unwrap();
        assert_eq!(first.output.unwrap().name(), "first");
        let second = rx2.await.unwrap().unwrap();
        assert!(!second.ok);
    }

    #[tokio::test]
    async fn unexpected_payload_is_loud() {
        let correlator = Correlator::new();
        let result = correlator.resolve(Ok(Response {
            ok: true,
            output: None,
            status: None,
        }));
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn fail_all_rejects_every_pending_request() {
        let correlator = Correlator::new();
        let rx1 = correlator.expect();
        let rx2 = correlator.expect();
        correlator.fail_all("socket closed");

        assert!(matches!(rx1.await.unwrap(), Err(Error::Transport { .. })));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Transport { .. })));
    }

    #[test]
    fn rejection_messages_cover_output_shapes() {
        assert_eq!(rejection_message(None), "no error was returned");
        assert_eq!(
            rejection_message(Some(&Entry::string("error-message", "boom"))),
            "boom"
        );
        let err: Entry =
            pathlink_api::ErrorEntry::new("e", "not-found", "tests", "missing").into();
        assert_eq!(rejection_message(Some(&err)), "missing (not-found)");
    }
}
