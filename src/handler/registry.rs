//! Handler traits and a name-based dispatch registry.
//!
//! A connection holds at most one [`RequestHandler`] and one
//! [`EventHandler`]. Plain closures implement both traits. For dispatch by
//! method name, build a [`HandlerRegistry`] and install it on the connection.
//!
//! Each registered method declares its argument tuple type up front. The
//! registry decodes the request payload positionally against that tuple, so
//! nothing about the handler's signature is inspected at call time.
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.method("ADD", |(a, b): (i64, i64)| async move {
//!     Ok::<_, String>(a + b)
//! });
//! registry.method("DIV", |(a, b): (i64, i64)| async move {
//!     if b == 0 {
//!         return Err("division by zero".to_string());
//!     }
//!     Ok(a / b)
//! });
//! registry.event("ARRIVED", |name: String| async move {
//!     println!("{} arrived", name);
//! });
//!
//! registry.install(&conn);
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Event, Request, Response};
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::DecodeArgs;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Answers inbound requests.
///
/// The returned future is awaited on the connection's read loop before the
/// next frame is read. An `Err` is logged; it does not close the connection.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle `request`, answering through `response`.
    fn call(&self, request: Request, response: Response) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, request: Request, response: Response) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(request, response))
    }
}

/// Receives inbound events.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle `event`. Awaited on the read loop like requests.
    fn call(&self, event: Event) -> BoxFuture<'static, ()>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<'static, ()> {
        Box::pin(self(event))
    }
}

/// Prepares a freshly accepted or dialed connection before traffic flows.
///
/// Typically installs the request and event handlers. Returning an error
/// closes that connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Set up `conn`. Its read loop has not started yet.
    fn on_connection(&self, conn: &Connection) -> Result<()>;
}

impl<F> ConnectionHandler for F
where
    F: Fn(&Connection) -> Result<()> + Send + Sync + 'static,
{
    fn on_connection(&self, conn: &Connection) -> Result<()> {
        self(conn)
    }
}

/// Method handler that decodes an argument tuple before calling `handler`.
struct TypedMethod<F, A, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> Fut>,
}

impl<F, A, Fut, R, E> RequestHandler for TypedMethod<F, A, Fut>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: DecodeArgs + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    fn call(&self, request: Request, response: Response) -> BoxFuture<'static, Result<()>> {
        let args: A = match request.args() {
            Ok(args) => args,
            Err(e) => {
                let message = format!("decoding arguments: {}", e);
                return Box::pin(response.send_error(message));
            }
        };

        let fut = (self.handler)(args);
        Box::pin(async move {
            match fut.await {
                Ok(value) => response.send(&value).await,
                Err(e) => response.send_error(e.to_string()).await,
            }
        })
    }
}

/// Event handler that decodes the event data before calling `handler`.
struct TypedEvent<F, T, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> EventHandler for TypedEvent<F, T, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, event: Event) -> BoxFuture<'static, ()> {
        match event.decode::<T>() {
            Ok(data) => Box::pin((self.handler)(data)),
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "decoding event data");
                Box::pin(async {})
            }
        }
    }
}

#[derive(Clone, Default)]
struct Tables {
    methods: HashMap<String, Arc<dyn RequestHandler>>,
    events: HashMap<String, Arc<dyn EventHandler>>,
}

/// Dispatches requests and events to handlers registered by name.
///
/// Unknown methods are answered with the error `no handler for method
/// <name>`; unknown events are dropped with a warning. Cloning is cheap; a
/// clone starts out with the handlers registered so far, and registrations
/// made afterwards apply only to the registry they are made on.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    tables: Arc<Tables>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed method handler.
    ///
    /// The request payload is decoded as the tuple `A`. A decode failure is
    /// answered with `decoding arguments: <error>`. `Ok(value)` is sent as
    /// the result; `Err(e)` is sent as the error string `e.to_string()`.
    pub fn method<A, R, E, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DecodeArgs + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        self.request_handler(
            name,
            TypedMethod {
                handler,
                _phantom: PhantomData,
            },
        )
    }

    /// Register a typed event handler. The event data is decoded as `T`.
    pub fn event<T, F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler(
            name,
            TypedEvent {
                handler,
                _phantom: PhantomData,
            },
        )
    }

    /// Register a raw request handler for one method.
    pub fn request_handler<H: RequestHandler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        Arc::make_mut(&mut self.tables)
            .methods
            .insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a raw event handler for one event name.
    pub fn event_handler<H: EventHandler>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        Arc::make_mut(&mut self.tables)
            .events
            .insert(name.into(), Arc::new(handler));
        self
    }

    /// Whether a handler is registered for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.tables.methods.contains_key(method)
    }

    /// Whether a handler is registered for the event `name`.
    pub fn has_event(&self, name: &str) -> bool {
        self.tables.events.contains_key(name)
    }

    /// Install this registry as both the request and the event handler of
    /// `conn`.
    pub fn install(&self, conn: &Connection) {
        conn.on_request(self.clone());
        conn.on_event(self.clone());
    }
}

impl RequestHandler for HandlerRegistry {
    fn call(&self, request: Request, response: Response) -> BoxFuture<'static, Result<()>> {
        match self.tables.methods.get(request.method()) {
            Some(handler) => handler.call(request, response),
            None => {
                tracing::warn!(method = request.method(), "no handler for method");
                let message = format!("no handler for method {}", request.method());
                Box::pin(response.send_error(message))
            }
        }
    }
}

impl EventHandler for HandlerRegistry {
    fn call(&self, event: Event) -> BoxFuture<'static, ()> {
        match self.tables.events.get(event.name()) {
            Some(handler) => handler.call(event),
            None => {
                tracing::warn!(event = event.name(), "no handler for event, dropping");
                Box::pin(async {})
            }
        }
    }
}
