//! One-shot handoff of a request's outcome from the read loop to its caller.
//!
//! [`ResponseFuture`] is what `send_request` returns. The matching
//! `Completer` lives in the connection's outstanding table until the read
//! loop takes it out and resolves it. Resolving consumes the completer, so a
//! future can only be resolved once.
//!
//! # Example
//!
//! ```ignore
//! let future = conn.send_request("ADD", (5, 2)).await?;
//! let sum: i64 = future.get_result().await?;
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::codec::MsgPackCodec;
use crate::error::{Result, RpcError};

/// Terminal state of a request.
#[derive(Debug, Clone)]
enum Outcome {
    /// Encoded result value.
    Completed(Bytes),
    /// Application error sent by the peer.
    Failed(String),
    /// Connection went down first.
    Closed,
}

/// Resolves exactly one [`ResponseFuture`].
#[derive(Debug)]
pub(crate) struct Completer {
    tx: watch::Sender<Option<Outcome>>,
}

impl Completer {
    /// Resolve with an encoded result.
    pub(crate) fn complete(self, payload: Bytes) {
        self.tx.send_replace(Some(Outcome::Completed(payload)));
    }

    /// Resolve with an application error.
    pub(crate) fn fail(self, message: String) {
        self.tx.send_replace(Some(Outcome::Failed(message)));
    }

    /// Resolve because the connection is gone.
    pub(crate) fn close(self) {
        self.tx.send_replace(Some(Outcome::Closed));
    }
}

/// The eventual result of a request sent with
/// [`Connection::send_request`](crate::Connection::send_request).
///
/// Cloning is cheap; every clone observes the same outcome, and
/// [`get_result`](Self::get_result) may be called any number of times.
#[derive(Debug, Clone)]
pub struct ResponseFuture {
    id: u64,
    rx: watch::Receiver<Option<Outcome>>,
    codec: MsgPackCodec,
}

/// Create a pending future and the completer that resolves it.
pub(crate) fn channel(id: u64, codec: MsgPackCodec) -> (Completer, ResponseFuture) {
    let (tx, rx) = watch::channel(None);
    (Completer { tx }, ResponseFuture { id, rx, codec })
}

impl ResponseFuture {
    /// Correlation id of the request.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the outcome is already known.
    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    async fn outcome(&self) -> Outcome {
        let mut rx = self.rx.clone();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            // Completer dropped unresolved
            Err(_) => None,
        };
        resolved.unwrap_or(Outcome::Closed)
    }

    /// Wait for the response and return the raw encoded result.
    pub async fn wait(&self) -> Result<Bytes> {
        match self.outcome().await {
            Outcome::Completed(payload) => Ok(payload),
            Outcome::Failed(message) => Err(RpcError::Remote(message)),
            Outcome::Closed => Err(RpcError::ConnectionClosed),
        }
    }

    /// Wait for the response and decode the result as `T`.
    ///
    /// Returns [`RpcError::Remote`] if the peer answered with an error,
    /// [`RpcError::ConnectionClosed`] if the connection went down first, or a
    /// decode error if the result does not fit `T`. Nothing is decoded when
    /// the peer answered with an error.
    pub async fn get_result<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.wait().await?;
        self.codec.decode(&payload)
    }
}
