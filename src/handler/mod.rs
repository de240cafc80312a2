//! Handler module - what user code sees of inbound traffic.
//!
//! Provides:
//! - [`Request`], [`Response`], [`Event`] - per-frame values given to handlers
//! - [`RequestHandler`], [`EventHandler`], [`ConnectionHandler`] - callback traits,
//!   implemented for plain closures
//! - [`HandlerRegistry`] - dispatch by method or event name with typed arguments
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::handler::{Request, Response};
//!
//! conn.on_request(|req: Request, resp: Response| async move {
//!     match req.method() {
//!         "ADD" => {
//!             let (a, b): (i64, i64) = req.args()?;
//!             resp.send(&(a + b)).await
//!         }
//!         other => resp.send_error(format!("unknown method {}", other)).await,
//!     }
//! });
//! ```

mod message;
mod registry;

pub use message::{Event, Request, Response, DROPPED_RESPONSE};
pub use registry::{
    BoxFuture, ConnectionHandler, EventHandler, HandlerRegistry, RequestHandler,
};
