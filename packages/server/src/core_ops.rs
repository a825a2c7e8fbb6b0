//! The seeded operation table: ping, get, store, unlink, enumerate,
//! subscribe, invoke.

use std::collections::BTreeMap;

use pathlink_api::{
    enumerate_into_subscription, notification, Entry, EnumerationWriter, Error, Request,
};

use crate::server::{op_handler, OpHandler, Server};

pub(crate) fn core_ops() -> BTreeMap<String, OpHandler> {
    let mut ops = BTreeMap::new();
    ops.insert(
        "ping".to_string(),
        op_handler(|_server, _request| async { Ok(None) }),
    );
    ops.insert("get".to_string(), op_handler(op_get));
    ops.insert("store".to_string(), op_handler(op_store));
    ops.insert("unlink".to_string(), op_handler(op_unlink));
    ops.insert("enumerate".to_string(), op_handler(op_enumerate));
    ops.insert("subscribe".to_string(), op_handler(op_subscribe));
    ops.insert("invoke".to_string(), op_handler(op_invoke));
    ops
}

fn required_path(request: &Request) -> Result<String, Error> {
    request
        .path
        .clone()
        .ok_or_else(|| Error::malformed("Path is required"))
}

fn required_depth(request: &Request) -> Result<u32, Error> {
    request
        .depth
        .ok_or_else(|| Error::malformed("Depth is required"))
}

async fn op_get(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let path = required_path(&request)?;
    let entry = server.env().resolve_required(&path).await?;
    if !entry.caps().get {
        return Err(Error::not_supported_at("get", path));
    }
    entry.get().await
}

async fn op_store(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let dest = request
        .dest
        .clone()
        .ok_or_else(|| Error::malformed("Dest is required"))?;
    let entry = server.env().resolve_required(&dest).await?;
    if !entry.caps().put {
        return Err(Error::not_supported_at("put", dest));
    }
    entry.put(request.input).await?;
    Ok(None)
}

async fn op_unlink(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let path = required_path(&request)?;
    let entry = server.env().resolve_required(&path).await?;
    if !entry.caps().put {
        return Err(Error::not_supported_at("put", path));
    }
    entry.put(None).await?;
    Ok(None)
}

async fn op_enumerate(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let path = required_path(&request)?;
    let depth = required_depth(&request)?;
    let entry = server.env().resolve_required(&path).await?;
    if !entry.caps().enumerate {
        return Err(Error::not_supported_at("enumerate", path));
    }

    let mut writer = EnumerationWriter::new(depth);
    entry.enumerate(&mut writer).await?;
    Ok(Some(writer.to_output()?.into()))
}

async fn op_subscribe(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let path = required_path(&request)?;
    let depth = required_depth(&request)?;
    let channels = server
        .channel_factory()
        .ok_or_else(|| Error::other("transport doesn't support channels, cannot subscribe"))?;

    let entry = server.env().resolve_required(&path).await?;
    let caps = entry.caps();

    if caps.subscribe {
        let channel = entry.subscribe(depth, channels.as_ref()).await?;
        return Ok(Some(channel.into()));
    }

    // No native subscription: degrade to a one-shot snapshot.
    if caps.enumerate {
        let channel = enumerate_into_subscription(entry, depth, channels.as_ref()).await?;
        return Ok(Some(channel.into()));
    }

    if caps.get {
        let channel = channels
            .open(Box::new(move |chan| {
                tokio::spawn(async move {
                    match entry.get().await {
                        Ok(value) => {
                            if let Some(value) = value {
                                let _ =
                                    chan.next(notification("Added", Some(""), Some(value)));
                            }
                            let _ = chan.next(notification("Ready", None, None));
                            let _ = chan.error(Some(Entry::string(
                                "nosub",
                                "this entry does not implement reactive subscriptions",
                            )));
                        }
                        Err(err) => {
                            let _ = chan.error(Some(Entry::string("reason", err.to_string())));
                        }
                    }
                });
            }))
            .await?;
        return Ok(Some(channel.into()));
    }

    Err(Error::not_supported_at("subscribe", path))
}

async fn op_invoke(server: Server, request: Request) -> Result<Option<Entry>, Error> {
    let path = required_path(&request)?;
    let entry = server.env().resolve_required(&path).await?;
    if !entry.caps().invoke {
        return Err(Error::not_supported_at("invoke", path));
    }

    let output = entry.invoke(request.input).await?;
    let Some(output) = output else {
        return Ok(None);
    };

    // With a Dest, the rich output lands in the tree instead of returning.
    if let Some(dest) = request.dest {
        let target = server.env().resolve_required(&dest).await?;
        if !target.caps().put {
            return Err(Error::not_supported_at("put", dest));
        }
        target.put(Some(output)).await?;
        return Ok(None);
    }

    Ok(Some(output))
}
