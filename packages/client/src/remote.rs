//! A remote namespace projected behind the Device contract.
//!
//! Every capability maps to a wire operation, so a mounted RemoteDevice
//! makes a far-away tree indistinguishable from a local one.

use std::sync::Arc;

use async_trait::async_trait;

use pathlink_api::{
    Caps, ChannelEntry, ChannelFactory, Device, Entry, EnumerationWriter, Error, Handle, Packet,
    Request, StopState,
};

use crate::client::Client;

/// Projects the namespace behind a client, under a path prefix.
pub struct RemoteDevice {
    remote: Arc<dyn Client>,
    prefix: String,
}

impl RemoteDevice {
    pub fn new(remote: Arc<dyn Client>, prefix: impl Into<String>) -> Self {
        Self {
            remote,
            prefix: prefix.into(),
        }
    }

    /// Narrow to a deeper prefix on the same connection.
    pub fn sub_root(&self, path: &str) -> RemoteDevice {
        RemoteDevice {
            remote: Arc::clone(&self.remote),
            prefix: format!("{}{}", self.prefix, path),
        }
    }

    /// Ping through to confirm the far side speaks the protocol.
    pub async fn ready(&self) -> Result<(), Error> {
        self.remote.perform_op(Request::new("ping")).await.map(|_| ())
    }
}

#[async_trait]
impl Device for RemoteDevice {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        Ok(Some(Box::new(RemoteHandle {
            remote: Arc::clone(&self.remote),
            path: format!("{}{}", self.prefix, sub_path),
        })))
    }
}

/// One remote path. Claims every capability and lets the far side reject
/// what it doesn't actually support.
pub struct RemoteHandle {
    remote: Arc<dyn Client>,
    path: String,
}

impl RemoteHandle {
    fn wire_path(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        }
    }
}

#[async_trait]
impl Handle for RemoteHandle {
    fn caps(&self) -> Caps {
        Caps::all()
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        self.remote
            .perform_op(Request::new("get").with_path(&self.path))
            .await
    }

    async fn put(&self, value: Option<Entry>) -> Result<(), Error> {
        let request = match value {
            None => Request::new("unlink").with_path(&self.path),
            Some(entry) => Request::new("store").with_dest(&self.path).with_input(entry),
        };
        self.remote.perform_op(request).await.map(|_| ())
    }

    async fn invoke(&self, input: Option<Entry>) -> Result<Option<Entry>, Error> {
        let mut request = Request::new("invoke").with_path(&self.path);
        if let Some(input) = input {
            request = request.with_input(input);
        }
        self.remote.perform_op(request).await
    }

    async fn enumerate(&self, writer: &mut EnumerationWriter) -> Result<(), Error> {
        let response = self
            .remote
            .perform_op(
                Request::new("enumerate")
                    .with_path(self.wire_path())
                    .with_depth(writer.remaining_depth()),
            )
            .await?;

        // Transclude the remote walk at our cursor.
        if let Some(enumeration) = response {
            writer.visit_enumeration(enumeration)?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        depth: u32,
        channels: &dyn ChannelFactory,
    ) -> Result<ChannelEntry, Error> {
        tracing::debug!(path = %self.path, "starting remote subscription");
        let response = self
            .remote
            .perform_op(
                Request::new("subscribe")
                    .with_path(&self.path)
                    .with_depth(depth),
            )
            .await?
            .ok_or_else(|| Error::protocol("subscribe returned no channel"))?;

        let remote_channel = match response {
            Entry::Channel(channel) => channel,
            other => {
                return Err(Error::protocol(format!(
                    "subscribe returned a {} instead of a Channel",
                    other.type_name()
                )));
            }
        };
        let source = remote_channel
            .take_channel()
            .ok_or_else(|| Error::protocol("remote channel was already consumed"))?;

        // Proxy between the remote stream and a locally-made channel, and
        // forward a local stop to the far side.
        channels
            .open(Box::new(move |chan| {
                let mut stop = chan.stop_signal();
                let stop_target = remote_channel.clone();
                tokio::spawn(async move {
                    loop {
                        let state = stop.borrow_and_update().clone();
                        if let StopState::Stopped(reason) = state {
                            if let Err(err) = stop_target.stop(reason).await {
                                tracing::debug!(error = %err, "remote stop failed");
                            }
                            break;
                        }
                        if stop.changed().await.is_err() {
                            break;
                        }
                    }
                });

                tokio::spawn(async move {
                    let mut source = source;
                    while let Some(packet) = source.recv().await {
                        let sent = match packet {
                            Packet::Next(entry) => chan.next(entry),
                            Packet::Error(output) => chan.error(output),
                            Packet::Done(output) => chan.done(output),
                        };
                        if sent.is_err() {
                            break;
                        }
                    }
                });
            }))
            .await
    }
}
