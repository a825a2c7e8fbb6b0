//! End-to-end reversal: a live device crosses the wire and stays invokable.

use std::sync::Arc;

use pathlink_api::devices::FunctionDevice;
use pathlink_api::{Device, DeviceEntry, Entry, Environment, Error, Request};
use pathlink_client::{Client, ClientExtension, WebSocketClient};
use pathlink_reversal::{ClientReversal, ServerReversal};
use pathlink_server::{accept_websocket, ChannelExtension, InlineChannelCarrier, Server};

/// A function that expects a Device input and invokes it with "21".
fn caller_env() -> Arc<Environment> {
    let env = Arc::new(Environment::new());
    env.bind(
        "/use",
        Arc::new(FunctionDevice::new(|input| async move {
            let device = match &input {
                Some(Entry::Device(d)) => d.device(),
                other => {
                    return Err(Error::malformed(format!(
                        "expected a Device input, got {:?}",
                        other
                    )));
                }
            };
            let handle = device
                .resolve("/invoke")
                .await?
                .ok_or_else(|| Error::not_found("/invoke"))?;
            handle.invoke(Some(Entry::string("n", "21"))).await
        })),
    )
    .unwrap();
    env
}

/// The capability being passed around: doubles its numeric input.
fn doubler() -> Arc<FunctionDevice> {
    Arc::new(FunctionDevice::new(|input| async move {
        let n: i64 = match &input {
            Some(Entry::String(s)) => s
                .value
                .parse()
                .map_err(|e| Error::malformed(format!("bad number: {}", e)))?,
            _ => return Err(Error::malformed("expected a String input")),
        };
        Ok(Some(Entry::string("doubled", (n * 2).to_string())))
    }))
}

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
                    server.attach(&ServerReversal::new()).unwrap();
                    server
                })
                .await;
            });
        }
    });
    format!("ws://{}", addr)
}

#[tokio::test]
async fn a_passed_device_is_invokable_across_the_wire() {
    let endpoint = serve(caller_env()).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();
    let as_client: Arc<dyn Client> = client.clone();
    ClientReversal::new()
        .unwrap()
        .attach_to(&as_client)
        .unwrap();

    let device = doubler();

    // What the function would produce against the local device.
    let local_handle = device.resolve("/invoke").await.unwrap().unwrap();
    let local = local_handle
        .invoke(Some(Entry::string("n", "21")))
        .await
        .unwrap()
        .unwrap();

    // Pass the live device over the one connection and let the far side
    // call back into it.
    let remote = client
        .perform_op(
            Request::new("invoke")
                .with_path("/use/invoke")
                .with_input(Entry::Device(DeviceEntry::new("doubler", device))),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(remote, local);
    assert_eq!(remote.as_string().unwrap().value, "42");

    client.stop(None);
}

#[tokio::test]
async fn each_passed_device_gets_its_own_pub_prefix() {
    let endpoint = serve(caller_env()).await;

    let client = WebSocketClient::connect(&endpoint).await.unwrap();
    let as_client: Arc<dyn Client> = client.clone();
    let reversal = ClientReversal::new().unwrap();
    reversal.attach_to(&as_client).unwrap();

    for _ in 0..2 {
        client
            .perform_op(
                Request::new("invoke")
                    .with_path("/use/invoke")
                    .with_input(Entry::Device(DeviceEntry::new("doubler", doubler()))),
            )
            .await
            .unwrap();
    }

    let mounts = reversal.env().mounts();
    assert!(mounts.contains(&"/pub/0".to_string()));
    assert!(mounts.contains(&"/pub/1".to_string()));

    client.stop(None);
}
