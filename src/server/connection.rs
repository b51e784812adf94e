//! Per-connection HTTP/1.1 state machine.
//!
//! ```text
//! AwaitingRequest ──► ParsingHead ──► Dispatching ──► WritingResponse ──┐
//!        ▲                 │                                             │
//!        │                 └──► (400 / 408 / 413 / 431) ──► Closed       │
//!        └────────────────────── keep-alive ◄────────────────────────────┘
//! ```
//!
//! Requests on one connection are handled strictly one after another: the
//! next head is not parsed until the previous response has been written.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use super::config::{Limits, ServerConfig};
use crate::http::response::{ResponseOptions, Sink};
use crate::http::{BodyLength, ChunkedDecoder, RequestError};
use crate::middleware::{MiddlewareChain, panic_error};
use crate::router::{Handler, Matched, RouteMatch, Router};
use crate::{BoxError, Headers, Method, Request, Response, StatusCode};

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Everything a connection needs that is shared, read-only, by all connections.
pub(crate) struct Service {
    router: Router,
    chain: MiddlewareChain,
    default_headers: Headers,
    limits: Limits,
}

impl Service {
    pub(crate) fn new(router: Router, config: &ServerConfig) -> Self {
        Self {
            router,
            chain: config.chain(),
            default_headers: config.default_headers.clone(),
            limits: config.limits.clone(),
        }
    }
}

enum State {
    AwaitingRequest,
    ParsingHead,
    Dispatching(Request),
    WritingResponse(Exchange),
    Closed,
}

// One request/response pair between dispatch and the keep-alive decision.
struct Exchange {
    request: Request,
    response: Response,
    fault: Option<BoxError>,
    matched: bool,
    cancelled: bool,
}

enum BodyError {
    Request(RequestError),
    Timeout,
    Closed,
}

struct Connection<R> {
    reader: R,
    writer: Option<Sink>,
    buf: BytesMut,
    peer: Option<SocketAddr>,
    service: Arc<Service>,
    shutdown: watch::Receiver<bool>,
}

/// Serves HTTP/1.1 requests on `io` until the peer leaves, a request asks
/// for the connection to close, a protocol error occurs or `shutdown` flips
/// to `true`.
pub(crate) async fn serve<S>(
    io: S,
    peer: Option<SocketAddr>,
    service: Arc<Service>,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = tokio::io::split(io);
    let mut conn = Connection {
        reader,
        writer: Some(Box::new(writer)),
        buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        peer,
        service,
        shutdown,
    };

    let mut state = State::AwaitingRequest;
    loop {
        state = match state {
            State::AwaitingRequest => conn.await_request().await,
            State::ParsingHead => conn.parse_head().await,
            State::Dispatching(request) => conn.dispatch(request).await,
            State::WritingResponse(exchange) => conn.write_response(exchange).await,
            State::Closed => break,
        };
    }
    conn.close().await;
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    async fn await_request(&mut self) -> State {
        if !self.buf.is_empty() {
            return State::ParsingHead;
        }
        let idle = self.service.limits.keep_alive_timeout;
        tokio::select! {
            read = timeout(idle, self.reader.read_buf(&mut self.buf)) => match read {
                Ok(Ok(0)) => {
                    debug!(peer = ?self.peer, "connection closed by peer");
                    State::Closed
                }
                Ok(Ok(_)) => State::ParsingHead,
                Ok(Err(e)) => {
                    debug!(peer = ?self.peer, error = %e, "read failed");
                    State::Closed
                }
                Err(_) => {
                    debug!(peer = ?self.peer, "keep-alive timeout");
                    State::Closed
                }
            },
            () = shutdown_signalled(&mut self.shutdown) => {
                debug!(peer = ?self.peer, "closing idle connection for shutdown");
                State::Closed
            }
        }
    }

    async fn parse_head(&mut self) -> State {
        let limits = self.service.limits.clone();
        let deadline = Instant::now() + limits.head_timeout;

        let (mut request, body_offset) = loop {
            match Request::parse(&self.buf, limits.max_headers) {
                Ok(parsed) => break parsed,
                Err(RequestError::Incomplete) => {
                    if self.buf.len() > limits.max_head_size {
                        let e = RequestError::HeadTooLarge {
                            max_bytes: limits.max_head_size,
                        };
                        return self.reject(StatusCode::RequestHeaderFieldsTooLarge, e).await;
                    }
                }
                Err(e) if e.is_too_many_headers() => {
                    return self.reject(StatusCode::RequestHeaderFieldsTooLarge, e).await;
                }
                Err(e) => return self.reject(StatusCode::BadRequest, e).await,
            }

            match timeout_at(deadline, self.reader.read_buf(&mut self.buf)).await {
                Ok(Ok(0)) => {
                    debug!(peer = ?self.peer, "peer closed mid-head");
                    return State::Closed;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(peer = ?self.peer, error = %e, "read failed");
                    return State::Closed;
                }
                Err(_) => {
                    return self
                        .reject(StatusCode::RequestTimeout, "request head not completed in time")
                        .await;
                }
            }
        };

        if body_offset > limits.max_head_size {
            let e = RequestError::HeadTooLarge {
                max_bytes: limits.max_head_size,
            };
            return self.reject(StatusCode::RequestHeaderFieldsTooLarge, e).await;
        }
        self.buf.advance(body_offset);
        request.set_peer_addr(self.peer);

        let framing = match request.body_length() {
            Ok(framing) => framing,
            Err(e) => return self.reject(StatusCode::BadRequest, e).await,
        };
        if let BodyLength::Fixed(n) = framing {
            if n > limits.max_body_size {
                let e = RequestError::BodyTooLarge {
                    max_bytes: limits.max_body_size,
                };
                return self.reject(StatusCode::PayloadTooLarge, e).await;
            }
        }
        if framing != BodyLength::Empty && request.expects_continue() {
            if let Err(e) = self.write_raw(b"HTTP/1.1 100 Continue\r\n\r\n").await {
                debug!(peer = ?self.peer, error = %e, "failed to send 100 Continue");
                return State::Closed;
            }
        }

        let body = match framing {
            BodyLength::Empty => Ok(Bytes::new()),
            BodyLength::Fixed(n) => self.read_fixed_body(n, &limits).await,
            BodyLength::Chunked => self.read_chunked_body(&limits).await,
        };
        match body {
            Ok(body) => {
                request.set_body(body);
                State::Dispatching(request)
            }
            Err(BodyError::Request(e @ RequestError::BodyTooLarge { .. })) => {
                self.reject(StatusCode::PayloadTooLarge, e).await
            }
            Err(BodyError::Request(e)) => self.reject(StatusCode::BadRequest, e).await,
            Err(BodyError::Timeout) => {
                self.reject(StatusCode::RequestTimeout, "request body not received in time")
                    .await
            }
            Err(BodyError::Closed) => {
                debug!(peer = ?self.peer, "peer closed mid-body");
                State::Closed
            }
        }
    }

    async fn read_fixed_body(&mut self, len: usize, limits: &Limits) -> Result<Bytes, BodyError> {
        while self.buf.len() < len {
            self.buf.reserve(len - self.buf.len());
            self.fill(limits).await?;
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_chunked_body(&mut self, limits: &Limits) -> Result<Bytes, BodyError> {
        let mut decoder = ChunkedDecoder::new(limits.max_body_size, limits.max_head_size);
        loop {
            if let Some(body) = decoder.decode(&mut self.buf).map_err(BodyError::Request)? {
                return Ok(body);
            }
            self.fill(limits).await?;
        }
    }

    async fn fill(&mut self, limits: &Limits) -> Result<(), BodyError> {
        match timeout(limits.body_timeout, self.reader.read_buf(&mut self.buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => Err(BodyError::Closed),
            Ok(Ok(_)) => Ok(()),
            Err(_) => Err(BodyError::Timeout),
        }
    }

    async fn dispatch(&mut self, request: Request) -> State {
        let Some(sink) = self.writer.take() else {
            return State::Closed;
        };
        let options = ResponseOptions {
            head_only: *request.method() == Method::Head,
            keep_alive: request.is_keep_alive(),
            chunked: request.version() == 1,
        };
        let service = Arc::clone(&self.service);
        let response = Response::new(sink, &service.default_headers, options);

        debug!(
            peer = ?self.peer,
            method = request.method().as_str(),
            path = request.path(),
            "dispatching request"
        );

        let mut exchange = Exchange {
            request,
            response,
            fault: None,
            matched: false,
            cancelled: false,
        };
        let request = &mut exchange.request;
        let response = &exchange.response;

        match service.router.resolve(request.path(), request.method()) {
            RouteMatch::NotFound => {
                if let Err(e) = respond(response, StatusCode::NotFound, None).await {
                    debug!(peer = ?self.peer, error = %e, "failed to send 404");
                }
            }
            RouteMatch::MethodNotAllowed(allowed) => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Err(e) = respond(response, StatusCode::MethodNotAllowed, Some(allow)).await {
                    debug!(peer = ?self.peer, error = %e, "failed to send 405");
                }
            }
            RouteMatch::Matched(Matched { handler, params }) => {
                request.set_params(params);
                let request = &*request;
                exchange.matched = true;
                tokio::select! {
                    fault = invoke(&service.chain, &handler, request, response) => {
                        exchange.fault = fault;
                    }
                    () = shutdown_signalled(&mut self.shutdown) => {
                        exchange.cancelled = true;
                    }
                }
            }
        }
        State::WritingResponse(exchange)
    }

    async fn write_response(&mut self, exchange: Exchange) -> State {
        let Exchange {
            request,
            response,
            fault,
            matched,
            cancelled,
        } = exchange;
        let mut broken = false;

        if cancelled {
            debug!(peer = ?self.peer, path = request.path(), "handler cancelled by shutdown");
            if !response.is_committed() && response.reset(StatusCode::ServiceUnavailable).is_ok() {
                let _ = response.close();
                if let Err(e) = response.send_text("Service Unavailable").await {
                    debug!(peer = ?self.peer, error = %e, "failed to send 503");
                }
            }
        }

        if let Some(fault) = &fault {
            warn!(
                peer = ?self.peer,
                method = request.method().as_str(),
                path = request.path(),
                committed = response.is_committed(),
                error = %fault,
                "handler failed"
            );
            if response.is_committed() {
                broken = true;
            } else if response.reset(StatusCode::InternalServerError).is_ok() {
                if let Err(e) = response.send_text("Internal Server Error").await {
                    debug!(peer = ?self.peer, error = %e, "failed to send 500");
                }
            }
        }

        match response.end_stream().await {
            Ok(true) => debug!(peer = ?self.peer, "terminated open response stream"),
            Ok(false) => {}
            Err(e) => {
                debug!(peer = ?self.peer, error = %e, "failed to terminate response stream");
                broken = true;
            }
        }

        if !response.is_committed() {
            if let Err(e) = response.send_empty().await {
                debug!(peer = ?self.peer, error = %e, "failed to send empty response");
            }
        }

        if matched {
            let service = Arc::clone(&self.service);
            service.chain.run_after(&request, &response).await;
        }

        let write_failed = response.write_failed().await;
        let shutting_down = *self.shutdown.borrow();
        let close =
            broken || cancelled || write_failed || shutting_down || response.wants_close();
        self.writer = response.take_sink().await;

        if close || self.writer.is_none() {
            debug!(peer = ?self.peer, "closing connection after response");
            State::Closed
        } else {
            State::AwaitingRequest
        }
    }

    // Answers a protocol error and closes; framing can no longer be trusted.
    async fn reject(&mut self, status: StatusCode, reason: impl std::fmt::Display) -> State {
        warn!(
            peer = ?self.peer,
            status = status.as_u16(),
            error = %reason,
            "rejecting request"
        );
        if let Some(sink) = self.writer.take() {
            let options = ResponseOptions {
                keep_alive: false,
                ..ResponseOptions::default()
            };
            let response = Response::new(sink, &self.service.default_headers, options);
            if let Err(e) = respond(&response, status, None).await {
                debug!(peer = ?self.peer, error = %e, "failed to send error response");
            }
            self.writer = response.take_sink().await;
        }
        State::Closed
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(sink) => {
                sink.write_all(bytes).await?;
                sink.flush().await
            }
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    async fn close(mut self) {
        if let Some(mut sink) = self.writer.take() {
            if let Err(e) = sink.shutdown().await {
                debug!(peer = ?self.peer, error = %e, "socket shutdown failed");
            }
        }
        debug!(peer = ?self.peer, "connection closed");
    }
}

// Runs the before hooks and, unless one short-circuits, the handler.
// Returns the fault, if any.
async fn invoke(
    chain: &MiddlewareChain,
    handler: &Handler,
    request: &Request,
    response: &Response,
) -> Option<BoxError> {
    match chain.run_before(request, response).await {
        Ok(ControlFlow::Break(())) => return None,
        Ok(ControlFlow::Continue(())) => {}
        Err(fault) => return Some(fault),
    }
    match AssertUnwindSafe(handler(request.clone(), response.clone()))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some(fault),
        Err(payload) => Some(panic_error(payload)),
    }
}

// Sends a framework-generated response whose body is the reason phrase.
async fn respond(
    response: &Response,
    status: StatusCode,
    allow: Option<String>,
) -> Result<(), crate::http::ResponseError> {
    response.set_status(status)?;
    if let Some(allow) = allow {
        response.set_header("Allow", allow)?;
    }
    response.send_text(status.canonical_reason()).await
}

// Resolves once shutdown has been requested; never resolves if the server
// dropped its sender without requesting one.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}
