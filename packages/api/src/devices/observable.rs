//! A watchable value cell with live subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::channel::{ChannelEntry, ChannelFactory};
use crate::device::{Caps, Device, Handle};
use crate::entry::Entry;
use crate::enumeration::notification;
use crate::error::Error;

/// Holds one optional Entry. Readers get the current value; subscribers get
/// the notification protocol: an initial `Added` (when a value exists),
/// `Ready`, then `Changed`/`Removed` per update until stopped.
pub struct ObservableDevice {
    cell: Arc<watch::Sender<Option<Entry>>>,
}

impl ObservableDevice {
    pub fn new(initial: Option<Entry>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { cell: Arc::new(tx) }
    }

    /// Replace the value, waking every subscriber.
    pub fn update(&self, value: Option<Entry>) {
        self.cell.send_replace(value);
    }
}

#[async_trait]
impl Device for ObservableDevice {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        match sub_path {
            "" | "/" => Ok(Some(Box::new(ObservableHandle {
                cell: Arc::clone(&self.cell),
            }))),
            _ => Ok(None),
        }
    }
}

struct ObservableHandle {
    cell: Arc<watch::Sender<Option<Entry>>>,
}

#[async_trait]
impl Handle for ObservableHandle {
    fn caps(&self) -> Caps {
        Caps {
            get: true,
            put: true,
            subscribe: true,
            ..Default::default()
        }
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        Ok(self.cell.borrow().clone())
    }

    async fn put(&self, value: Option<Entry>) -> Result<(), Error> {
        self.cell.send_replace(value);
        Ok(())
    }

    async fn subscribe(
        &self,
        _depth: u32,
        channels: &dyn ChannelFactory,
    ) -> Result<ChannelEntry, Error> {
        let cell = Arc::clone(&self.cell);
        channels
            .open(Box::new(move |chan| {
                let mut updates = cell.subscribe();
                tokio::spawn(async move {
                    let mut stop = chan.stop_signal();

                    let current = updates.borrow_and_update().clone();
                    if let Some(entry) = current {
                        let _ = chan.next(notification("Added", Some(""), Some(entry)));
                    }
                    let _ = chan.next(notification("Ready", None, None));

                    loop {
                        tokio::select! {
                            changed = stop.changed() => {
                                let reason = match changed {
                                    Ok(()) => match &*stop.borrow() {
                                        crate::channel::StopState::Stopped(reason) => reason.clone(),
                                        crate::channel::StopState::Running => None,
                                    },
                                    Err(_) => None,
                                };
                                let _ = chan.done(reason);
                                break;
                            }
                            changed = updates.changed() => {
                                if changed.is_err() {
                                    // Cell owner went away; nothing more will come.
                                    let _ = chan.done(None);
                                    break;
                                }
                                let value = updates.borrow_and_update().clone();
                                let packet = match value {
                                    Some(entry) => notification("Changed", Some(""), Some(entry)),
                                    None => notification("Removed", Some(""), None),
                                };
                                if chan.next(packet).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{LocalChannels, Packet};

    fn notif_type(packet: &Packet) -> String {
        match packet {
            Packet::Next(Entry::Folder(f)) => f.child_string("type").unwrap().to_string(),
            other => panic!("expected a notif folder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_and_put_round_trip() {
        let device = ObservableDevice::new(None);
        let handle = device.resolve("").await.unwrap().unwrap();
        assert!(handle.get().await.unwrap().is_none());

        handle.put(Some(Entry::string("v", "now"))).await.unwrap();
        assert_eq!(
            handle.get().await.unwrap().unwrap().as_string().unwrap().value,
            "now"
        );
    }

    #[tokio::test]
    async fn subscription_sees_ready_then_changes() {
        let device = ObservableDevice::new(Some(Entry::string("v", "initial")));
        let handle = device.resolve("").await.unwrap().unwrap();
        let channels = LocalChannels::new();

        let entry = handle.subscribe(0, &channels).await.unwrap();
        let mut stream = entry.take_channel().unwrap();

        assert_eq!(notif_type(&stream.recv().await.unwrap()), "Added");
        assert_eq!(notif_type(&stream.recv().await.unwrap()), "Ready");

        device.update(Some(Entry::string("v", "second")));
        let changed = stream.recv().await.unwrap();
        assert_eq!(notif_type(&changed), "Changed");

        device.update(None);
        assert_eq!(notif_type(&stream.recv().await.unwrap()), "Removed");

        entry.stop(None).await.unwrap();
        assert!(matches!(stream.recv().await, Some(Packet::Done(_))));
        assert!(stream.recv().await.is_none());
    }
}
