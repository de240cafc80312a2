//! Hello - a server and a client talking over TCP in one process.
//!
//! This example demonstrates:
//! - Preparing every accepted connection with a `HandlerRegistry`
//! - Typed request handlers and a typed event handler
//! - Calling a method and firing an event from the client
//!
//! # Running
//!
//! ```text
//! RUST_LOG=rpcwire=debug cargo run --example hello
//! ```

use rpcwire::handler::HandlerRegistry;
use rpcwire::{Connection, Server};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Visitor announced with the `ARRIVED` event.
#[derive(Serialize, Deserialize, Debug)]
struct Visitor {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hello=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let (arrived_tx, mut arrived_rx) = mpsc::unbounded_channel();

    let mut registry = HandlerRegistry::new();
    registry
        .method("HELLO", |(name,): (String,)| async move {
            Ok::<_, String>(format!("hello, {}", name))
        })
        .event("ARRIVED", move |visitor: Visitor| {
            let arrived_tx = arrived_tx.clone();
            async move {
                let _ = arrived_tx.send(visitor.name);
            }
        });

    let server = Server::tcp();
    server.on_connection(move |conn: &Connection| {
        tracing::info!(peer = conn.peer_addr(), "client connected");
        registry.install(conn);
        Ok(())
    });
    server.listen("127.0.0.1:0").await?;
    let addr = server.local_addr().ok_or("server stopped listening")?;

    let client = Connection::connect_tcp(&addr).await?;

    let greeting: String = client
        .send_request("HELLO", ("world",))
        .await?
        .get_result()
        .await?;
    tracing::info!(%greeting, "got response");

    client
        .send_event(
            "ARRIVED",
            &Visitor {
                name: "joe".to_string(),
            },
        )
        .await?;
    if let Some(name) = arrived_rx.recv().await {
        tracing::info!(%name, "server saw arrival");
    }

    client.close().await?;
    server.close().await?;
    Ok(())
}
