//! Values handed to request and event handlers.
//!
//! - [`Request`] - method name, correlation id and the encoded arguments
//! - [`Response`] - single-use handle that writes the answer back
//! - [`Event`] - event name and its encoded data
//!
//! # Example
//!
//! ```ignore
//! conn.on_request(|req: Request, resp: Response| async move {
//!     let (a, b): (i64, i64) = req.args()?;
//!     resp.send(&(a + b)).await
//! });
//! ```

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::{Result, RpcError};
use crate::protocol::{ArgsDecoder, DecodeArgs, Frame};
use crate::writer::{OutboundFrame, WriterHandle};

/// Error sent back when a [`Response`] is dropped unused.
pub const DROPPED_RESPONSE: &str = "request dropped without a response";

/// An inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    id: u64,
    payload: Bytes,
    codec: MsgPackCodec,
}

impl Request {
    pub(crate) fn new(method: String, id: u64, payload: Bytes, codec: MsgPackCodec) -> Self {
        Self {
            method,
            id,
            payload,
            codec,
        }
    }

    /// Method name.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Correlation id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encoded arguments, concatenated in declared order.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decode the arguments as a tuple.
    ///
    /// ```ignore
    /// let (a, b): (i64, i64) = req.args()?;
    /// ```
    pub fn args<A: DecodeArgs>(&self) -> Result<A> {
        A::decode_args(&mut self.arg_decoder())
    }

    /// Decoder for reading the arguments one at a time.
    pub fn arg_decoder(&self) -> ArgsDecoder<'_> {
        ArgsDecoder::new(&self.payload, self.codec)
    }
}

/// Write-once handle for answering a [`Request`].
///
/// [`send`](Self::send) and [`send_error`](Self::send_error) consume the
/// handle, so a request is answered at most once. A handle dropped without
/// being used answers with the error [`DROPPED_RESPONSE`] so the requester is
/// not left waiting.
pub struct Response {
    id: u64,
    writer: Option<WriterHandle>,
    codec: MsgPackCodec,
}

impl Response {
    pub(crate) fn new(id: u64, writer: WriterHandle, codec: MsgPackCodec) -> Self {
        Self {
            id,
            writer: Some(writer),
            codec,
        }
    }

    /// Correlation id of the request being answered.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Answer with a result value.
    ///
    /// `result` is encoded before the returned future is first polled, so it
    /// need not outlive this call. If it cannot be encoded, the requester
    /// receives an error response instead and the encode error is returned.
    pub fn send<T: Serialize + ?Sized>(
        self,
        result: &T,
    ) -> impl Future<Output = Result<()>> + Send {
        let encoded = self.codec.encode(result);
        async move {
            match encoded {
                Ok(payload) => self.send_raw(payload).await,
                Err(e) => {
                    self.send_error(format!("encoding result: {}", e)).await?;
                    Err(e)
                }
            }
        }
    }

    /// Answer with an already encoded result value.
    pub async fn send_raw(mut self, payload: Vec<u8>) -> Result<()> {
        let writer = self.writer.take().ok_or(RpcError::ConnectionClosed)?;
        writer.send_frame(&Frame::response(self.id, payload)).await
    }

    /// Answer with an application error.
    pub async fn send_error(mut self, message: impl Into<String>) -> Result<()> {
        let writer = self.writer.take().ok_or(RpcError::ConnectionClosed)?;
        writer
            .send_frame(&Frame::error_response(self.id, message))
            .await
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };

        tracing::warn!(id = self.id, "response dropped unsent");
        let frame = Frame::error_response(self.id, DROPPED_RESPONSE);
        match OutboundFrame::encode(&frame) {
            Ok(frame) => {
                if let Err(e) = writer.try_send(frame) {
                    tracing::debug!(id = self.id, error = %e, "could not queue dropped response");
                }
            }
            Err(e) => tracing::error!(id = self.id, error = %e, "encoding dropped response"),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.id)
            .field("used", &self.writer.is_none())
            .finish()
    }
}

/// An inbound one-way event.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    payload: Bytes,
    codec: MsgPackCodec,
}

impl Event {
    pub(crate) fn new(name: String, payload: Bytes, codec: MsgPackCodec) -> Self {
        Self {
            name,
            payload,
            codec,
        }
    }

    /// Event name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded event data.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decode the event data as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.codec.decode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameBuffer, FrameType};
    use crate::writer::{spawn_writer_task, WriterConfig};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::sync::watch;

    fn writer() -> (WriterHandle, DuplexStream, watch::Sender<bool>) {
        let (client, server) = duplex(4096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_writer_task(
            client,
            &WriterConfig::default(),
            shutdown_rx,
            |_: &RpcError| {},
        );
        (handle, server, shutdown_tx)
    }

    async fn read_frame(stream: &mut DuplexStream) -> Frame {
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before a frame arrived");
            if let Some(frame) = frames.push(&buf[..n]).unwrap().into_iter().next() {
                return frame;
            }
        }
    }

    #[test]
    fn test_request_args() {
        let codec = MsgPackCodec::new();
        let mut payload = Vec::new();
        codec.encode_into(&mut payload, &5i64).unwrap();
        codec.encode_into(&mut payload, &2i64).unwrap();

        let request = Request::new("ADD".to_string(), 3, Bytes::from(payload), codec);

        assert_eq!(request.method(), "ADD");
        assert_eq!(request.id(), 3);
        let (a, b): (i64, i64) = request.args().unwrap();
        assert_eq!(a + b, 7);
    }

    #[test]
    fn test_request_arg_decoder() {
        let codec = MsgPackCodec::new();
        let payload = codec.encode("only").unwrap();
        let request = Request::new("ECHO".to_string(), 1, Bytes::from(payload), codec);

        let mut decoder = request.arg_decoder();
        assert_eq!(decoder.next::<String>().unwrap(), "only");
        assert!(matches!(
            decoder.next::<String>(),
            Err(RpcError::MissingArgument(1))
        ));
    }

    #[test]
    fn test_event_decode() {
        let codec = MsgPackCodec::new();
        let event = Event::new(
            "ARRIVED".to_string(),
            Bytes::from(codec.encode("joe").unwrap()),
            codec,
        );

        assert_eq!(event.name(), "ARRIVED");
        assert_eq!(event.decode::<String>().unwrap(), "joe");
    }

    #[tokio::test]
    async fn test_response_send() {
        let (handle, mut server, _shutdown) = writer();
        let codec = MsgPackCodec::new();

        Response::new(42, handle, codec).send(&7i64).await.unwrap();

        let frame = read_frame(&mut server).await;
        assert_eq!(frame.frame_type, FrameType::Response);
        assert_eq!(frame.id, 42);
        assert!(frame.error.is_empty());
        assert_eq!(codec.decode::<i64>(&frame.payload).unwrap(), 7);
    }

    #[tokio::test]
    async fn test_response_send_error() {
        let (handle, mut server, _shutdown) = writer();

        Response::new(9, handle, MsgPackCodec::new())
            .send_error("division by zero")
            .await
            .unwrap();

        let frame = read_frame(&mut server).await;
        assert!(frame.is_error());
        assert_eq!(frame.error, "division by zero");
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_empty_error_still_reads_as_failure() {
        let (handle, mut server, _shutdown) = writer();

        Response::new(4, handle, MsgPackCodec::new())
            .send_error("")
            .await
            .unwrap();

        let frame = read_frame(&mut server).await;
        assert!(frame.is_error());
        assert_eq!(frame.error, crate::protocol::UNKNOWN_ERROR);
    }

    #[tokio::test]
    async fn test_dropped_response_sends_error() {
        let (handle, mut server, _shutdown) = writer();

        drop(Response::new(5, handle, MsgPackCodec::new()));

        let frame = read_frame(&mut server).await;
        assert_eq!(frame.id, 5);
        assert_eq!(frame.error, DROPPED_RESPONSE);
    }
}
