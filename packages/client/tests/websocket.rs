//! End-to-end: WebSocketClient against a served namespace.

use std::sync::Arc;
use std::time::Duration;

use pathlink_api::devices::{FunctionDevice, ObservableDevice, TempDevice};
use pathlink_api::{Entry, Environment, Packet, Request};
use pathlink_client::{Client, RemoteDevice, WebSocketClient};
use pathlink_server::{accept_websocket, ChannelExtension, InlineChannelCarrier, Server};

async fn serve(env: Arc<Environment>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let env = Arc::clone(&env);
            tokio::spawn(async move {
                let _ = accept_websocket(stream, |sink| {
                    let server = Server::with_post(env, sink);
                    server.attach(&ChannelExtension::new()).unwrap();
                    server.attach(&InlineChannelCarrier::new()).unwrap();
                    server
                })
                .await;
            });
        }
    });
    format!("ws://{}", addr)
}

fn notif_type(packet: &Packet) -> String {
    match packet {
        Packet::Next(Entry::Folder(f)) => f.child_string("type").unwrap().to_string(),
        other => panic!("expected a notif folder, got {:?}", other),
    }
}

#[tokio::test]
async fn store_and_get_round_trip() {
    let env = Arc::new(Environment::new());
    env.bind("/tmp", Arc::new(TempDevice::new())).unwrap();
    let endpoint = serve(env).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();
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
async fn responses_pair_with_their_requests() {
    let env = Arc::new(Environment::new());
    env.bind(
        "/slow",
        Arc::new(FunctionDevice::new(|_input| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Some(Entry::string("out", "slow-done")))
        })),
    )
    .unwrap();
    let endpoint = serve(env).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();

    // If pairing or server ordering slipped, the invoke would get ping's
    // empty response.
    let (invoked, pinged) = tokio::join!(
        client.perform_op(Request::new("invoke").with_path("/slow/invoke")),
        client.perform_op(Request::new("ping")),
    );
    let invoked = invoked.unwrap().unwrap();
    assert_eq!(invoked.as_string().unwrap().value, "slow-done");
    assert!(pinged.unwrap().is_none());

    client.stop(None);
}

#[tokio::test]
async fn subscription_streams_live_updates() {
    let env = Arc::new(Environment::new());
    let observable = Arc::new(ObservableDevice::new(Some(Entry::string("v", "initial"))));
    env.bind("/val", Arc::clone(&observable) as Arc<dyn pathlink_api::Device>)
        .unwrap();
    let endpoint = serve(env).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();
    let output = client
        .perform_op(Request::new("subscribe").with_path("/val").with_depth(0))
        .await
        .unwrap()
        .unwrap();

    let channel_entry = match output {
        Entry::Channel(c) => c,
        other => panic!("expected a Channel entry, got {:?}", other),
    };
    let mut stream = channel_entry.take_channel().unwrap();

    assert_eq!(notif_type(&stream.recv().await.unwrap()), "Added");
    assert_eq!(notif_type(&stream.recv().await.unwrap()), "Ready");

    observable.update(Some(Entry::string("v", "changed")));
    let changed = stream.recv().await.unwrap();
    assert_eq!(notif_type(&changed), "Changed");
    match &changed {
        Packet::Next(Entry::Folder(f)) => {
            let entry = f.child("entry").unwrap();
            assert_eq!(entry.as_string().unwrap().value, "changed");
        }
        _ => unreachable!(),
    }

    // Stop round-trips to the producer and ends in a terminal packet.
    channel_entry.stop(None).await.unwrap();
    loop {
        match stream.recv().await {
            Some(Packet::Done(_)) | None => break,
            Some(Packet::Next(_)) => continue,
            Some(Packet::Error(output)) => panic!("unexpected error terminal: {:?}", output),
        }
    }

    client.stop(None);
}

#[tokio::test]
async fn remote_device_projects_the_namespace() {
    let env = Arc::new(Environment::new());
    env.bind("/tmp", Arc::new(TempDevice::new())).unwrap();
    let endpoint = serve(env).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();
    let device = RemoteDevice::new(client.clone(), "/tmp");
    device.ready().await.unwrap();

    let local = Arc::new(Environment::new());
    local
        .bind("/remote", Arc::new(device.sub_root("")) as Arc<dyn pathlink_api::Device>)
        .unwrap();

    let handle = local.resolve_required("/remote/key").await.unwrap();
    handle.put(Some(Entry::string("v", "transparent"))).await.unwrap();
    let value = handle.get().await.unwrap().unwrap();
    assert_eq!(value.as_string().unwrap().value, "transparent");

    client.stop(None);
}
