//! RPC demo over the UNIX-domain transport: a synchronous call, a delayed
//! reply, an error reply, and a call against an unregistered service.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pslink::codec::default_codec;
use pslink::rpc::{RpcClient, RpcServer, RpcTypeDef, ServiceLocator};
use pslink::transports::UnixDomainRpcTransport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct HelloReq {
    msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct HelloRes {
    msg: String,
}

fn hello_type() -> RpcTypeDef<HelloReq, HelloRes> {
    RpcTypeDef::new(
        "greeter",
        "hello",
        "hello_t",
        Arc::new(default_codec::<HelloReq>()),
        Arc::new(default_codec::<HelloRes>()),
    )
}

#[derive(Parser)]
#[command(name = "rpc-hello", about = "pslink RPC UNIX-domain demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Client calls, provider replies immediately.
    SyncOk,
    /// Provider delays its reply by about a second.
    Delayed,
    /// Provider replies with a failure instead of data.
    Error,
    /// Client calls a service the locator has no location for.
    UnknownService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .event_format(pslink::logging::ColorizedFormatter)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::SyncOk => sync_ok().await,
        Command::Delayed => delayed().await,
        Command::Error => error_reply().await,
        Command::UnknownService => unknown_service().await,
    }
}

async fn endpoint_for(name: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ep = dir.path().join(name).to_string_lossy().to_string();
    (dir, ep)
}

async fn sync_ok() -> anyhow::Result<()> {
    let (_dir, ep) = endpoint_for("greeter").await;
    let transport = Arc::new(UnixDomainRpcTransport::new());
    let server = RpcServer::new(transport.clone());
    server.add_provider(ep.clone()).await?;

    let type_def = Arc::new(hello_type());
    {
        let server = server.clone();
        let type_def = type_def.clone();
        server.add_rpc("greeter", "hello", "hello_t", move |tx, data| {
            let req: HelloReq = bincode::deserialize(&data).unwrap();
            let server = server.clone();
            let type_def = type_def.clone();
            tokio::spawn(async move {
                let res = HelloRes { msg: "hey there".into() };
                if let Err(e) = server.reply_ok(&tx, &type_def, &res).await {
                    tracing::error!("reply_ok failed: {e}");
                }
            });
        })?;
    }

    let locator = Arc::new(ServiceLocator::new());
    locator.set_service_location("greeter", ep)?;
    let client = RpcClient::new(transport, locator);
    let res = client
        .call(&type_def, &HelloReq { msg: "Hi".into() }, Duration::from_secs(2))
        .await?;
    println!("sync OK: {}", res.msg);
    Ok(())
}

async fn delayed() -> anyhow::Result<()> {
    let (_dir, ep) = endpoint_for("greeter").await;
    let transport = Arc::new(UnixDomainRpcTransport::new());
    let server = RpcServer::new(transport.clone());
    server.add_provider(ep.clone()).await?;

    let type_def = Arc::new(hello_type());
    {
        let server = server.clone();
        let type_def = type_def.clone();
        server.add_rpc("greeter", "hello", "hello_t", move |tx, _data| {
            server.reply_delayed(&tx, &type_def).unwrap();
            let server = server.clone();
            let type_def = type_def.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let res = HelloRes { msg: "hey there..sorry".into() };
                if let Err(e) = server.reply_ok(&tx, &type_def, &res).await {
                    tracing::error!("reply_ok failed: {e}");
                }
            });
        })?;
    }

    let locator = Arc::new(ServiceLocator::new());
    locator.set_service_location("greeter", ep)?;
    let client = RpcClient::new(transport, locator);
    let started = std::time::Instant::now();
    let res = client
        .call(&type_def, &HelloReq { msg: "Hi".into() }, Duration::from_secs(5))
        .await?;
    println!("delayed reply after {:?}: {}", started.elapsed(), res.msg);
    Ok(())
}

async fn error_reply() -> anyhow::Result<()> {
    let (_dir, ep) = endpoint_for("greeter").await;
    let transport = Arc::new(UnixDomainRpcTransport::new());
    let server = RpcServer::new(transport.clone());
    server.add_provider(ep.clone()).await?;

    let type_def = Arc::new(hello_type());
    {
        let server = server.clone();
        let type_def = type_def.clone();
        server.add_rpc("greeter", "hello", "hello_t", move |tx, _data| {
            let server = server.clone();
            let type_def = type_def.clone();
            tokio::spawn(async move {
                if let Err(e) = server.reply_error(&tx, &type_def, "boom").await {
                    tracing::error!("reply_error failed: {e}");
                }
            });
        })?;
    }

    let locator = Arc::new(ServiceLocator::new());
    locator.set_service_location("greeter", ep)?;
    let client = RpcClient::new(transport, locator);
    match client
        .call(&type_def, &HelloReq { msg: "Hi".into() }, Duration::from_secs(2))
        .await
    {
        Err(pslink::rpc::Error::FailureResponse) => {
            println!("error reply OK: client saw FailureResponse");
            Ok(())
        }
        other => anyhow::bail!("expected FailureResponse, got {other:?}"),
    }
}

async fn unknown_service() -> anyhow::Result<()> {
    let transport = Arc::new(UnixDomainRpcTransport::new());
    let default_resolver = transport.clone();
    let locator = Arc::new(ServiceLocator::with_default(move |name| {
        Some(default_resolver.default_endpoint(name))
    }));
    let client = RpcClient::new(transport, locator);
    let type_def = hello_type();
    match client
        .call(&type_def, &HelloReq { msg: "Hi".into() }, Duration::from_secs(1))
        .await
    {
        Err(pslink::rpc::Error::SystemError(e)) => {
            println!("unknown service OK: connect failed as expected: {e}");
            Ok(())
        }
        other => anyhow::bail!("expected SystemError connecting to /var/run/greeter, got {other:?}"),
    }
}
