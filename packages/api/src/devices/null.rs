//! A device that resolves nothing.

use async_trait::async_trait;

use crate::device::{Device, Handle};
use crate::error::Error;

/// Answers every resolution with nothing. Bind it over a path to mask it
/// from listings without unmounting what sits beneath.
pub struct NullDevice;

#[async_trait]
impl Device for NullDevice {
    async fn resolve(&self, _sub_path: &str) -> Result<Option<Box<dyn Handle>>, Error> {
        Ok(None)
    }
}
