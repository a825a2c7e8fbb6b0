//! In-process scratch storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::device::{Caps, Device, Handle};
use crate::entry::Entry;
use crate::error::Error;

/// Keeps whatever callers put, keyed by sub-path. Every path resolves, even
/// before anything is stored there.
#[derive(Default)]
pub struct TempDevice {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TempDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Device for TempDevice {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        Ok(Some(Box::new(TempHandle {
            entries: Arc::clone(&self.entries),
            path: sub_path.to_string(),
        })))
    }
}

struct TempHandle {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    path: String,
}

#[async_trait]
impl Handle for TempHandle {
    fn caps(&self) -> Caps {
        Caps {
            get: true,
            put: true,
            ..Default::default()
        }
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        let entries = self.entries.lock().expect("temp store poisoned");
        Ok(entries.get(&self.path).cloned())
    }

    async fn put(&self, value: Option<Entry>) -> Result<(), Error> {
        let mut entries = self.entries.lock().expect("temp store poisoned");
        match value {
            Some(entry) => {
                entries.insert(self.path.clone(), entry);
            }
            None => {
                entries.remove(&self.path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let device = TempDevice::new();
        let handle = device.resolve("/x").await.unwrap().unwrap();
        handle.put(Some(Entry::string("v", "hello"))).await.unwrap();

        let again = device.resolve("/x").await.unwrap().unwrap();
        let value = again.get().await.unwrap().unwrap();
        assert_eq!(value.as_string().unwrap().value, "hello");
    }

    #[tokio::test]
    async fn unset_path_reads_as_none() {
        let device = TempDevice::new();
        let handle = device.resolve("/missing").await.unwrap().unwrap();
        assert!(handle.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_none_deletes() {
        let device = TempDevice::new();
        let handle = device.resolve("/x").await.unwrap().unwrap();
        handle.put(Some(Entry::string("v", "data"))).await.unwrap();
        handle.put(None).await.unwrap();
        assert!(handle.get().await.unwrap().is_none());
    }
}
