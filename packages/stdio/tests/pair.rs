//! Host and tenant talking over an in-process stream pair.

use std::sync::Arc;

use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

use pathlink_api::devices::{FunctionDevice, TempDevice};
use pathlink_api::{Device, DeviceEntry, Entry, Environment, Error, Packet, Request};
use pathlink_client::{Client, ClientExtension, RemoteDevice};
use pathlink_reversal::ClientReversal;
use pathlink_stdio::{StdioClient, Tenant};

fn tenant_env() -> Arc<Environment> {
    let env = Arc::new(Environment::new());
    env.bind("/tmp", Arc::new(TempDevice::new())).unwrap();
    env.bind(
        "/shout",
        Arc::new(FunctionDevice::new(|input| async move {
            match &input {
                Some(Entry::String(s)) => Ok(Some(Entry::string("out", s.value.to_uppercase()))),
                _ => Err(Error::malformed("expected a String input")),
            }
        })),
    )
    .unwrap();
    env
}

async fn connect(env: Arc<Environment>) -> Arc<StdioClient> {
    let (host_io, tenant_io) = duplex(64 * 1024);
    let (host_read, host_write) = split(host_io);
    let (tenant_read, tenant_write) = split(tenant_io);

    let tenant = Tenant::new(env, tenant_read, tenant_write).unwrap();
    tokio::spawn(tenant.run_loop());

    StdioClient::start(host_read, host_write).unwrap()
}

#[tokio::test]
async fn ping_store_get_over_lines() {
    let client = connect(tenant_env()).await;

    client.perform_op(Request::new("ping")).await.unwrap();
    client
        .perform_op(
            Request::new("store")
                .with_dest("/tmp/x")
                .with_input(Entry::string("v", "hello")),
        )
        .await
        .unwrap();

    let output = client
        .perform_op(Request::new("get").with_path("/tmp/x"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.as_string().unwrap().value, "hello");

    client.stop(None);
}

#[tokio::test]
async fn mounted_tenant_is_namespace_transparent() {
    let client = connect(tenant_env()).await;

    let local = Arc::new(Environment::new());
    let remote = RemoteDevice::new(client.clone() as Arc<dyn Client>, "");
    local
        .bind("/peer", Arc::new(remote) as Arc<dyn Device>)
        .unwrap();

    // Same verbs, remote tree: invoke through the local environment.
    let handle = local.resolve_required("/peer/shout/invoke").await.unwrap();
    let output = handle
        .invoke(Some(Entry::string("in", "quiet")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.as_string().unwrap().value, "QUIET");

    client.stop(None);
}

#[tokio::test]
async fn subscribe_falls_back_to_a_one_shot_snapshot() {
    let client = connect(tenant_env()).await;

    // /tmp/x is gettable but not subscribable or enumerable; subscribing
    // degrades to Added (when set), Ready, then a nosub terminal.
    client
        .perform_op(
            Request::new("store")
                .with_dest("/tmp/x")
                .with_input(Entry::string("v", "snapshot")),
        )
        .await
        .unwrap();

    let output = client
        .perform_op(Request::new("subscribe").with_path("/tmp/x").with_depth(0))
        .await
        .unwrap()
        .unwrap();
    let channel_entry = match output {
        Entry::Channel(c) => c,
        other => panic!("expected a Channel, got {:?}", other),
    };
    let mut stream = channel_entry.take_channel().unwrap();

    let added = stream.recv().await.unwrap();
    match &added {
        Packet::Next(Entry::Folder(f)) => {
            assert_eq!(f.child_string("type").unwrap(), "Added");
            let entry = f.child("entry").unwrap();
            assert_eq!(entry.as_string().unwrap().value, "snapshot");
        }
        other => panic!("expected Added, got {:?}", other),
    }

    let ready = stream.recv().await.unwrap();
    match &ready {
        Packet::Next(Entry::Folder(f)) => {
            assert_eq!(f.child_string("type").unwrap(), "Ready");
        }
        other => panic!("expected Ready, got {:?}", other),
    }

    match stream.recv().await.unwrap() {
        Packet::Error(Some(Entry::String(s))) => assert_eq!(s.name, "nosub"),
        other => panic!("expected the nosub terminal, got {:?}", other),
    }

    client.stop(None);
}

#[tokio::test]
async fn reversal_passes_live_devices_to_the_tenant() {
    let env = Arc::new(Environment::new());
    env.bind(
        "/apply",
        Arc::new(FunctionDevice::new(|input| async move {
            let device = match &input {
                Some(Entry::Device(d)) => d.device(),
                other => return Err(Error::malformed(format!("expected a Device, got {:?}", other))),
            };
            let handle = device
                .resolve("/invoke")
                .await?
                .ok_or_else(|| Error::not_found("/invoke"))?;
            handle.invoke(Some(Entry::string("n", "7"))).await
        })),
    )
    .unwrap();
    let client = connect(env).await;

    let as_client: Arc<dyn Client> = client.clone();
    ClientReversal::new().unwrap().attach_to(&as_client).unwrap();

    let tripler = Arc::new(FunctionDevice::new(|input| async move {
        let n: i64 = match &input {
            Some(Entry::String(s)) => s.value.parse().unwrap_or(0),
            _ => 0,
        };
        Ok(Some(Entry::string("tripled", (n * 3).to_string())))
    }));

    let output = client
        .perform_op(
            Request::new("invoke")
                .with_path("/apply/invoke")
                .with_input(Entry::Device(DeviceEntry::new("tripler", tripler))),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.as_string().unwrap().value, "21");

    client.stop(None);
}

#[tokio::test]
async fn diagnostic_lines_are_not_protocol_violations() {
    // Hand-rolled peer: reads the request line, chats some noise, then
    // answers properly.
    let (host_io, peer_io) = duplex(64 * 1024);
    let (host_read, host_write) = split(host_io);
    let (peer_read, mut peer_write) = split(peer_io);

    tokio::spawn(async move {
        let mut lines = BufReader::new(peer_read).lines();
        let _request = lines.next_line().await.unwrap();

        peer_write
            .write_all(b"starting up, one moment...\n")
            .await
            .unwrap();
        peer_write
            .write_all(b" -- {\"Ok\":true,\"Output\":{\"Type\":\"String\",\"Name\":\"v\",\"StringValue\":\"fine\"}}\n")
            .await
            .unwrap();
        peer_write.flush().await.unwrap();
    });

    let client = StdioClient::start(host_read, host_write).unwrap();
    let output = client
        .perform_op(Request::new("get").with_path("/x"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.as_string().unwrap().value, "fine");

    client.stop(None);
}
