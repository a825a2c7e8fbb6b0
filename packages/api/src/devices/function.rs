//! A single async function exposed through the namespace.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::device::{Caps, Device, Handle};
use crate::entry::{Entry, FunctionEntry};
use crate::enumeration::EnumerationWriter;
use crate::error::Error;

type Callback = dyn Fn(Option<Entry>) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, Error>> + Send>>
    + Send
    + Sync;

/// Mounts one invokable function. The device root reads as a one-function
/// Folder; `/invoke` is the invokable path.
pub struct FunctionDevice {
    callback: Arc<Callback>,
}

impl FunctionDevice {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(Option<Entry>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Entry>, Error>> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |input| Box::pin(callback(input))),
        }
    }
}

#[async_trait]
impl Device for FunctionDevice {
    async fn resolve(&self, sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        match sub_path {
            "" | "/" => Ok(Some(Box::new(RootHandle))),
            "/invoke" => Ok(Some(Box::new(InvokeHandle {
                callback: Arc::clone(&self.callback),
            }))),
            other => Err(Error::not_found(format!(
                "function devices only expose /invoke, not {}",
                other
            ))),
        }
    }
}

struct RootHandle;

#[async_trait]
impl Handle for RootHandle {
    fn caps(&self) -> Caps {
        Caps::readable()
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        Ok(Some(Entry::folder(
            "function",
            vec![FunctionEntry::new("invoke").into()],
        )))
    }

    async fn enumerate(&self, writer: &mut EnumerationWriter) -> Result<(), Error> {
        writer.visit(Entry::folder("", Vec::new()));
        if writer.can_descend() {
            writer.descend("invoke")?;
            writer.visit(FunctionEntry::new("").into());
            writer.ascend()?;
        }
        Ok(())
    }
}

struct InvokeHandle {
    callback: Arc<Callback>,
}

#[async_trait]
impl Handle for InvokeHandle {
    fn caps(&self) -> Caps {
        Caps {
            get: true,
            invoke: true,
            ..Default::default()
        }
    }

    async fn get(&self) -> Result<Option<Entry>, Error> {
        Ok(Some(FunctionEntry::new("invoke").into()))
    }

    async fn invoke(&self, input: Option<Entry>) -> Result<Option<Entry>, Error> {
        (self.callback)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout() -> FunctionDevice {
        FunctionDevice::new(|input| async move {
            let text = match &input {
                Some(Entry::String(s)) => s.value.to_uppercase(),
                _ => return Err(Error::malformed("expected a String input")),
            };
            Ok(Some(Entry::string("output", text)))
        })
    }

    #[tokio::test]
    async fn invoke_runs_the_callback() {
        let device = shout();
        let handle = device.resolve("/invoke").await.unwrap().unwrap();
        let output = handle
            .invoke(Some(Entry::string("input", "hey")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.as_string().unwrap().value, "HEY");
    }

    #[tokio::test]
    async fn root_describes_the_function() {
        let device = shout();
        let handle = device.resolve("").await.unwrap().unwrap();
        let value = handle.get().await.unwrap().unwrap();
        let folder = value.as_folder().unwrap();
        assert!(matches!(folder.child("invoke"), Some(Entry::Function(_))));
    }

    #[tokio::test]
    async fn other_paths_miss() {
        let device = shout();
        assert!(device.resolve("/other").await.is_err());
    }
}
