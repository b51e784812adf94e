//! HTTP/1.1 response writer.
//!
//! A [`Response`] is a cheaply clonable handle onto the write half of one
//! connection for the duration of one request. The body goes out in exactly
//! one of two modes:
//!
//! - **buffered**: one `send_*` call supplies the whole body and the head
//!   carries `Content-Length`;
//! - **streaming**: [`Response::open_body`] (or the scoped
//!   [`Response::stream`]) commits a `Transfer-Encoding: chunked` head and
//!   every [`BodyWriter::write`] emits one chunk frame.
//!
//! Mixing the two, or sending twice, is rejected with [`ResponseError`].

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::headers::{is_valid_name, is_valid_value};
use super::{Headers, StatusCode};
use crate::BoxError;

/// Errors produced while building or sending a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response head has already been sent")]
    Committed,

    #[error("response body has already been sent or opened")]
    AlreadySent,

    #[error("response body stream is closed")]
    StreamClosed,

    #[error("response is no longer attached to a connection")]
    Detached,

    #[error("invalid header field {name:?}")]
    InvalidHeader { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The write half of a connection, type-erased.
pub(crate) type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Per-request facts the writer needs from the request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResponseOptions {
    /// The request was `HEAD`: write heads, never bodies.
    pub head_only: bool,
    /// The client asked to keep the connection open.
    pub keep_alive: bool,
    /// The client understands the chunked transfer-coding (HTTP/1.1).
    pub chunked: bool,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            head_only: false,
            keep_alive: true,
            chunked: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    Pending,
    Buffered,
    Streaming,
    Complete,
}

#[derive(Debug)]
struct Meta {
    status: StatusCode,
    headers: Headers,
    mode: BodyMode,
    committed: bool,
    close: bool,
}

struct Wire {
    sink: Option<Sink>,
    bytes_written: u64,
    failed: bool,
}

struct Shared {
    meta: StdMutex<Meta>,
    wire: Mutex<Wire>,
    defaults: Headers,
    options: ResponseOptions,
}

/// An HTTP/1.1 response bound to a connection.
///
/// Clones share the same underlying state; sending through any clone
/// commits the response for all of them. The status defaults to `200 OK`
/// and the headers start out as the server's configured default headers.
///
/// # Examples
///
/// ```rust,no_run
/// use wicket::{BoxError, Request, Response, StatusCode};
///
/// async fn created(_req: Request, res: Response) -> Result<(), BoxError> {
///     res.set_status(StatusCode::Created)?;
///     res.set_header("Location", "/items/7")?;
///     res.send_json(&serde_json::json!({ "id": 7 })).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Response {
    shared: Arc<Shared>,
}

impl Response {
    pub(crate) fn new(sink: Sink, default_headers: &Headers, options: ResponseOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                meta: StdMutex::new(Meta {
                    status: StatusCode::Ok,
                    headers: default_headers.clone(),
                    mode: BodyMode::Pending,
                    committed: false,
                    close: !options.keep_alive,
                }),
                wire: Mutex::new(Wire {
                    sink: Some(sink),
                    bytes_written: 0,
                    failed: false,
                }),
                defaults: default_headers.clone(),
                options,
            }),
        }
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        self.shared.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs `f` against the metadata if the head has not been committed yet.
    fn edit<T>(&self, f: impl FnOnce(&mut Meta) -> T) -> Result<T, ResponseError> {
        let mut meta = self.meta();
        if meta.committed {
            return Err(ResponseError::Committed);
        }
        Ok(f(&mut meta))
    }

    /// Returns the current status code.
    pub fn status(&self) -> StatusCode {
        self.meta().status
    }

    /// Sets the status code.
    ///
    /// # Errors
    ///
    /// [`ResponseError::Committed`] once the head has been sent.
    pub fn set_status(&self, status: StatusCode) -> Result<(), ResponseError> {
        self.edit(|meta| meta.status = status)
    }

    /// Returns the first value of a response header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.meta().headers.get(name).map(str::to_owned)
    }

    /// Returns a snapshot of the response headers.
    pub fn headers(&self) -> Headers {
        self.meta().headers.clone()
    }

    /// Replaces any existing values of `name` with `value`.
    pub fn set_header(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        let (name, value) = validated(name.into(), value.into())?;
        self.edit(|meta| meta.headers.set(name, value))
    }

    /// Appends a header value, keeping existing values of the same name.
    pub fn add_header(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        let (name, value) = validated(name.into(), value.into())?;
        self.edit(|meta| meta.headers.insert(name, value))
    }

    /// Removes every value of `name`, returning whether any existed.
    pub fn remove_header(&self, name: &str) -> Result<bool, ResponseError> {
        self.edit(|meta| meta.headers.remove(name))
    }

    /// Asks for the connection to be closed after this response.
    pub fn close(&self) -> Result<(), ResponseError> {
        self.edit(|meta| meta.close = true)
    }

    /// Returns `true` once the head has been handed to the socket.
    pub fn is_committed(&self) -> bool {
        self.meta().committed
    }

    /// Returns `true` once the body has been fully written.
    pub fn is_complete(&self) -> bool {
        self.meta().mode == BodyMode::Complete
    }

    /// Returns `true` while a streaming body is open.
    pub fn is_streaming(&self) -> bool {
        self.meta().mode == BodyMode::Streaming
    }

    /// Returns the number of bytes written to the socket so far, head included.
    pub async fn bytes_written(&self) -> u64 {
        self.shared.wire.lock().await.bytes_written
    }

    /// Sends a `text/plain; charset=utf-8` body.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ResponseError> {
        let body = Bytes::from(text.into());
        self.send(Some("text/plain; charset=utf-8"), body).await
    }

    /// Sends a `text/html; charset=utf-8` body.
    pub async fn send_html(&self, html: impl Into<String>) -> Result<(), ResponseError> {
        let body = Bytes::from(html.into());
        self.send(Some("text/html; charset=utf-8"), body).await
    }

    /// Serializes `value` and sends it as `application/json`.
    pub async fn send_json<T>(&self, value: &T) -> Result<(), ResponseError>
    where
        T: serde::Serialize + ?Sized,
    {
        let body = Bytes::from(serde_json::to_vec(value)?);
        self.send(Some("application/json"), body).await
    }

    /// Sends a binary body (`application/octet-stream` unless a content type was set).
    pub async fn send_bytes(&self, body: impl Into<Bytes>) -> Result<(), ResponseError> {
        self.send(Some("application/octet-stream"), body.into()).await
    }

    /// Sends the head with an empty body.
    pub async fn send_empty(&self) -> Result<(), ResponseError> {
        self.send(None, Bytes::new()).await
    }

    /// Sends a complete body, with `Content-Length` computed up front.
    ///
    /// `content_type` is only applied when no `Content-Type` header was set.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::AlreadySent`]: a body was already sent or opened.
    /// - [`ResponseError::Io`]: the socket write failed.
    pub async fn send(&self, content_type: Option<&str>, body: Bytes) -> Result<(), ResponseError> {
        let (head, with_body) = {
            let mut meta = self.meta();
            if meta.mode != BodyMode::Pending {
                return Err(ResponseError::AlreadySent);
            }
            meta.mode = BodyMode::Buffered;
            meta.committed = true;

            let allows_body = meta.status.allows_body();
            meta.headers.remove("transfer-encoding");
            if allows_body {
                if let Some(ct) = content_type {
                    if !body.is_empty() && !meta.headers.contains("content-type") {
                        meta.headers.insert("Content-Type", ct);
                    }
                }
                meta.headers.set("Content-Length", body.len().to_string());
            } else {
                meta.headers.remove("content-length");
            }
            (self.seal_head(&mut meta), allows_body && !self.shared.options.head_only)
        };

        let mut buf = BytesMut::with_capacity(head.len() + body.len());
        buf.put(head);
        if with_body {
            buf.put(body);
        }
        let result = self.write_wire(&buf).await;
        self.meta().mode = BodyMode::Complete;
        result
    }

    /// Commits a streaming head and returns a writer for the body.
    ///
    /// Prefer [`stream`](Self::stream) when the body can be produced inside
    /// one closure. A stream that is still open when the handler returns,
    /// fails or is cancelled is terminated by the connection.
    ///
    /// # Errors
    ///
    /// [`ResponseError::AlreadySent`] if a body was already sent or opened.
    pub async fn open_body(&self) -> Result<BodyWriter, ResponseError> {
        let head = {
            let mut meta = self.meta();
            if meta.mode != BodyMode::Pending {
                return Err(ResponseError::AlreadySent);
            }
            meta.mode = BodyMode::Streaming;
            meta.committed = true;

            meta.headers.remove("content-length");
            if !meta.status.allows_body() {
                // 1xx, 204 and 304 end with the head; writes are dropped.
                meta.headers.remove("transfer-encoding");
            } else if self.shared.options.chunked {
                meta.headers.set("Transfer-Encoding", "chunked");
            } else {
                // Without chunked coding the end of the body is the end of the connection.
                meta.headers.remove("transfer-encoding");
                meta.close = true;
            }
            self.seal_head(&mut meta)
        };
        self.write_wire(&head).await?;
        Ok(BodyWriter {
            response: self.clone(),
        })
    }

    /// Runs `body_fn` with an open streaming body and terminates the stream
    /// afterwards, whether `body_fn` succeeded or failed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use wicket::{BoxError, Request, Response};
    ///
    /// async fn countdown(_req: Request, res: Response) -> Result<(), BoxError> {
    ///     res.stream(|mut body| async move {
    ///         for n in (1..=3).rev() {
    ///             body.write(format!("{n}\n")).await?;
    ///         }
    ///         Ok::<(), BoxError>(())
    ///     })
    ///     .await
    /// }
    /// ```
    pub async fn stream<F, Fut>(&self, body_fn: F) -> Result<(), BoxError>
    where
        F: FnOnce(BodyWriter) -> Fut,
        Fut: Future<Output = Result<(), BoxError>>,
    {
        let body = self.open_body().await?;
        let result = body_fn(body).await;
        let ended = self.end_stream().await;
        result?;
        ended?;
        Ok(())
    }

    /// Writes the terminating chunk if a stream is open.
    ///
    /// Returns `Ok(true)` if this call closed the stream. The mode switch
    /// happens before the write, so only one caller ever emits the terminator.
    pub(crate) async fn end_stream(&self) -> Result<bool, ResponseError> {
        {
            let mut meta = self.meta();
            if meta.mode != BodyMode::Streaming {
                return Ok(false);
            }
            meta.mode = BodyMode::Complete;
        }
        if self.shared.options.chunked && !self.body_suppressed() {
            self.write_wire(b"0\r\n\r\n").await?;
        }
        Ok(true)
    }

    // No body bytes may follow the head: HEAD requests and bodiless statuses.
    fn body_suppressed(&self) -> bool {
        self.shared.options.head_only || !self.meta().status.allows_body()
    }

    /// Restores the default headers and sets `status`, discarding whatever an
    /// uncommitted handler had prepared.
    pub(crate) fn reset(&self, status: StatusCode) -> Result<(), ResponseError> {
        let defaults = self.shared.defaults.clone();
        self.edit(|meta| {
            meta.status = status;
            meta.headers = defaults;
        })
    }

    /// Returns `true` if the connection must close after this response.
    pub(crate) fn wants_close(&self) -> bool {
        let meta = self.meta();
        meta.close || meta.headers.has_token("connection", "close")
    }

    /// Returns `true` if a socket write through this response failed.
    pub(crate) async fn write_failed(&self) -> bool {
        self.shared.wire.lock().await.failed
    }

    /// Detaches the socket write half from this response.
    ///
    /// Later writes through any clone fail with [`ResponseError::Detached`].
    pub(crate) async fn take_sink(&self) -> Option<Sink> {
        self.shared.wire.lock().await.sink.take()
    }

    // Finalizes the `Connection` header and renders the status line and headers.
    fn seal_head(&self, meta: &mut Meta) -> Bytes {
        if meta.headers.has_token("connection", "close") {
            meta.close = true;
        }
        let connection = if meta.close { "close" } else { "keep-alive" };
        meta.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + meta.headers.len() * 64);
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                meta.status.as_u16(),
                meta.status.canonical_reason()
            )
            .as_bytes(),
        );
        buf.put(meta.headers.to_string().as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.freeze()
    }

    async fn write_wire(&self, bytes: &[u8]) -> Result<(), ResponseError> {
        let mut wire = self.shared.wire.lock().await;
        let Wire {
            sink,
            bytes_written,
            failed,
        } = &mut *wire;
        let sink = sink.as_mut().ok_or(ResponseError::Detached)?;
        let written = async {
            sink.write_all(bytes).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = written {
            *failed = true;
            return Err(e.into());
        }
        *bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta();
        f.debug_struct("Response")
            .field("status", &meta.status)
            .field("headers", &meta.headers)
            .field("mode", &meta.mode)
            .finish()
    }
}

fn validated(name: String, value: String) -> Result<(String, String), ResponseError> {
    if is_valid_name(&name) && is_valid_value(&value) {
        Ok((name, value))
    } else {
        Err(ResponseError::InvalidHeader { name })
    }
}

/// The open body of a streaming response.
///
/// Each [`write`](Self::write) of a non-empty payload becomes one chunk frame:
/// the payload length in hexadecimal, CRLF, the payload, CRLF.
pub struct BodyWriter {
    response: Response,
}

impl BodyWriter {
    /// Writes one chunk. Empty payloads write nothing.
    ///
    /// # Errors
    ///
    /// [`ResponseError::StreamClosed`] after the stream was finished, or
    /// [`ResponseError::Io`] if the socket write failed.
    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        let data = data.as_ref();
        if !self.response.is_streaming() {
            return Err(ResponseError::StreamClosed);
        }
        if data.is_empty() || self.response.body_suppressed() {
            return Ok(());
        }
        if !self.response.shared.options.chunked {
            return self.response.write_wire(data).await;
        }

        let size_line = format!("{:x}\r\n", data.len());
        let mut frame = BytesMut::with_capacity(size_line.len() + data.len() + 2);
        frame.put(size_line.as_bytes());
        frame.put(data);
        frame.put(&b"\r\n"[..]);
        self.response.write_wire(&frame).await
    }

    /// Writes the terminating zero-length chunk and closes the stream.
    pub async fn finish(self) -> Result<(), ResponseError> {
        self.response.end_stream().await.map(|_| ())
    }

    /// Returns the response this body belongs to.
    pub fn response(&self) -> &Response {
        &self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn attach(options: ResponseOptions) -> (Response, DuplexStream) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let mut defaults = Headers::new();
        defaults.insert("Server", "wicket-test");
        (Response::new(Box::new(server), &defaults, options), client)
    }

    async fn wire(response: Response, mut client: DuplexStream) -> String {
        drop(response.take_sink().await);
        drop(response);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn buffered_text() {
        let (res, client) = attach(ResponseOptions::default());
        res.send_text("Hello").await.unwrap();
        let s = wire(res, client).await;
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Server: wicket-test\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[tokio::test]
    async fn default_headers_come_first() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_header("X-Request-Id", "abc-123").unwrap();
        res.send_html("<p>hi</p>").await.unwrap();
        let s = wire(res, client).await;
        let server = s.find("Server:").unwrap();
        let custom = s.find("X-Request-Id: abc-123").unwrap();
        assert!(server < custom);
        assert!(s.contains("Content-Type: text/html; charset=utf-8\r\n"));
    }

    #[tokio::test]
    async fn handler_content_type_wins() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_header("Content-Type", "text/csv").unwrap();
        res.send_text("a,b").await.unwrap();
        let s = wire(res, client).await;
        assert!(s.contains("Content-Type: text/csv\r\n"));
        assert!(!s.contains("text/plain"));
    }

    #[tokio::test]
    async fn second_send_is_rejected() {
        let (res, client) = attach(ResponseOptions::default());
        res.send_text("one").await.unwrap();
        assert!(matches!(
            res.send_text("two").await,
            Err(ResponseError::AlreadySent)
        ));
        assert!(matches!(res.open_body().await, Err(ResponseError::AlreadySent)));
        assert!(matches!(
            res.set_status(StatusCode::Created),
            Err(ResponseError::Committed)
        ));
        let s = wire(res, client).await;
        assert!(!s.contains("two"));
    }

    #[tokio::test]
    async fn send_after_open_body_is_rejected() {
        let (res, client) = attach(ResponseOptions::default());
        let body = res.open_body().await.unwrap();
        assert!(matches!(res.send_text("x").await, Err(ResponseError::AlreadySent)));
        body.finish().await.unwrap();
        drop(wire(res, client).await);
    }

    #[tokio::test]
    async fn invalid_header_rejected() {
        let (res, _client) = attach(ResponseOptions::default());
        assert!(matches!(
            res.set_header("X-Evil", "a\r\nSet-Cookie: b"),
            Err(ResponseError::InvalidHeader { .. })
        ));
        assert!(matches!(
            res.add_header("Bad Name", "v"),
            Err(ResponseError::InvalidHeader { .. })
        ));
    }

    #[tokio::test]
    async fn no_content_has_no_length() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_status(StatusCode::NoContent).unwrap();
        res.send_text("ignored").await.unwrap();
        let s = wire(res, client).await;
        assert!(s.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn no_content_stream_writes_head_only() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_status(StatusCode::NoContent).unwrap();
        let mut body = res.open_body().await.unwrap();
        body.write("x").await.unwrap();
        body.finish().await.unwrap();
        assert!(res.is_complete());
        assert!(!res.wants_close());
        let s = wire(res, client).await;
        assert!(s.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!s.contains("Transfer-Encoding"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("Connection: keep-alive\r\n\r\n"));
    }

    #[tokio::test]
    async fn not_modified_stream_scope_writes_no_frames() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_status(StatusCode::NotModified).unwrap();
        res.stream(|mut body| async move {
            body.write("stale").await?;
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap();
        let s = wire(res, client).await;
        assert!(s.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
        assert!(!s.contains("stale"));
        assert!(!s.contains("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn head_request_omits_body() {
        let options = ResponseOptions {
            head_only: true,
            ..ResponseOptions::default()
        };
        let (res, client) = attach(options);
        res.send_text("Hello").await.unwrap();
        let s = wire(res, client).await;
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn close_sets_connection_header() {
        let (res, client) = attach(ResponseOptions::default());
        res.close().unwrap();
        res.send_empty().await.unwrap();
        assert!(res.wants_close());
        let s = wire(res, client).await;
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[tokio::test]
    async fn chunk_frames() {
        let (res, client) = attach(ResponseOptions::default());
        let mut body = res.open_body().await.unwrap();
        body.write(b"hello").await.unwrap();
        body.write(b"").await.unwrap();
        body.write(vec![b'x'; 26]).await.unwrap();
        body.finish().await.unwrap();
        let s = wire(res, client).await;
        assert!(s.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!s.contains("Content-Length"));
        let body = s.split("\r\n\r\n").skip(1).collect::<Vec<_>>().join("\r\n\r\n");
        assert_eq!(body, format!("5\r\nhello\r\n1a\r\n{}\r\n0\r\n\r\n", "x".repeat(26)));
    }

    #[tokio::test]
    async fn stream_scope_terminates_on_error() {
        let (res, client) = attach(ResponseOptions::default());
        let result = res
            .stream(|mut body| async move {
                body.write("partial").await?;
                Err::<(), BoxError>("boom".into())
            })
            .await;
        assert!(result.is_err());
        assert!(res.is_complete());
        // A second termination attempt writes nothing.
        assert!(!res.end_stream().await.unwrap());
        let s = wire(res, client).await;
        assert!(s.ends_with("7\r\npartial\r\n0\r\n\r\n"));
        assert_eq!(s.matches("0\r\n\r\n").count(), 1);
    }

    #[tokio::test]
    async fn write_after_finish_fails() {
        let (res, _client) = attach(ResponseOptions::default());
        let mut body = res.open_body().await.unwrap();
        let mut other = BodyWriter {
            response: body.response().clone(),
        };
        body.write("a").await.unwrap();
        body.finish().await.unwrap();
        assert!(matches!(other.write("b").await, Err(ResponseError::StreamClosed)));
    }

    #[tokio::test]
    async fn http10_stream_is_raw_and_closes() {
        let options = ResponseOptions {
            chunked: false,
            keep_alive: true,
            head_only: false,
        };
        let (res, client) = attach(options);
        res.stream(|mut body| async move {
            body.write("abc").await?;
            body.write("def").await?;
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap();
        assert!(res.wants_close());
        let s = wire(res, client).await;
        assert!(!s.contains("Transfer-Encoding"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(s.ends_with("\r\n\r\nabcdef"));
    }

    #[tokio::test]
    async fn detached_response_cannot_write() {
        let (res, _client) = attach(ResponseOptions::default());
        drop(res.take_sink().await);
        assert!(matches!(res.send_text("late").await, Err(ResponseError::Detached)));
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let (res, client) = attach(ResponseOptions::default());
        res.set_header("X-Partial", "1").unwrap();
        res.set_status(StatusCode::Accepted).unwrap();
        res.reset(StatusCode::InternalServerError).unwrap();
        res.send_text("Internal Server Error").await.unwrap();
        let s = wire(res, client).await;
        assert!(s.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(s.contains("Server: wicket-test\r\n"));
        assert!(!s.contains("X-Partial"));
    }
}
