//! # rpcwire
//!
//! Symmetric request/response and event protocol over any duplex byte stream.
//!
//! Both ends of a [`Connection`] are equal: either side can send requests,
//! fire one-way events, and answer the requests of the other side. A
//! [`Server`] accepts connections and prepares each one before traffic flows.
//!
//! ## Architecture
//!
//! - **Frames**: one MsgPack map per frame with keys `t`, `m`, `i`, `e`, `p`;
//!   empty fields are left out
//! - **Correlation**: requests carry a per-connection id; responses resolve the
//!   matching [`ResponseFuture`]
//! - **Tasks**: one read loop and one writer task per connection, one accept
//!   loop per server
//!
//! Handlers run on the read loop, one at a time and in arrival order.
//!
//! ## Example
//!
//! ```ignore
//! use rpcwire::handler::HandlerRegistry;
//! use rpcwire::{Connection, Server};
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let mut registry = HandlerRegistry::new();
//!     registry.method("ADD", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });
//!
//!     let server = Server::tcp();
//!     server.on_connection(move |conn: &Connection| {
//!         registry.install(conn);
//!         Ok(())
//!     });
//!     server.listen("127.0.0.1:7000").await?;
//!
//!     let client = Connection::connect_tcp("127.0.0.1:7000").await?;
//!     let sum: i64 = client.send_request("ADD", (5, 2)).await?.get_result().await?;
//!     assert_eq!(sum, 7);
//!
//!     client.close().await?;
//!     server.close().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod config;
mod connection;
mod future;
mod pending;
mod server;
mod writer;

pub use codec::MsgPackCodec;
pub use config::{ConnectionConfig, DEFAULT_READ_BUFFER_SIZE};
pub use connection::{Connection, NO_REQUEST_HANDLER};
pub use error::{Result, RpcError};
pub use future::ResponseFuture;
pub use handler::{ConnectionHandler, Event, EventHandler, Request, RequestHandler, Response};
pub use server::Server;
pub use transport::{MemoryTransport, TcpTransport, Transport};
pub use writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_MAX_PENDING_FRAMES,
};
#[cfg(unix)]
pub use transport::UnixTransport;
