//! Spawn a tenant process and drive its namespace over stdio.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::task::JoinHandle;

use pathlink_api::{Error, ErrorEntry};
use pathlink_client::{Client, RemoteDevice};

use crate::client::StdioClient;

const AUTHORITY: &str = "pathlink/stdio";

/// A running tenant: the transport into it and its root as a mountable
/// device.
pub struct TenantProcess {
    pub client: Arc<StdioClient>,
    pub device: RemoteDevice,
    monitor: JoinHandle<()>,
}

impl TenantProcess {
    /// Close our end of the pipes and wait for the process to finish.
    pub async fn stop(self) {
        self.client.stop(None);
        let _ = self.monitor.await;
    }
}

/// Spawn `command` with piped stdio and bring up the line protocol over
/// it. Resolves once the tenant has answered a ping, which proves the
/// process speaks the protocol at all.
pub async fn spawn_tenant(mut command: Command) -> Result<TenantProcess, Error> {
    command.stdin(Stdio::piped()).stdout(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| Error::transport(format!("failed to spawn tenant: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::transport("tenant has no piped stdout"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::transport("tenant has no piped stdin"))?;

    let client = StdioClient::start(stdout, stdin)?;

    let monitor_client = Arc::clone(&client);
    let monitor = tokio::spawn(async move {
        let status = child.wait().await;
        let (code, message) = match status {
            Ok(status) if status.success() => {
                ("tenant-exited", "tenant process exited".to_string())
            }
            Ok(status) => (
                "tenant-failed",
                format!("tenant process exited with {}", status),
            ),
            Err(err) => (
                "tenant-failed",
                format!("couldn't observe tenant exit: {}", err),
            ),
        };
        monitor_client.stop(Some(
            ErrorEntry::new("reason", code, AUTHORITY, message).into(),
        ));
    });

    let device = RemoteDevice::new(client.clone() as Arc<dyn Client>, "");
    device.ready().await?;

    Ok(TenantProcess {
        client,
        device,
        monitor,
    })
}
