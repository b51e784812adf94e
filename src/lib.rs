//! # wicket
//!
//! An async HTTP/1.1 connection engine: request framing, keep-alive,
//! a typed-pattern router with mountable sub-routers, before/after
//! middleware, and buffered or chunked-streaming responses.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wicket::router::Router;
//! use wicket::server::{Server, ServerConfig};
//! use wicket::{BoxError, Request, Response};
//!
//! async fn double(req: Request, res: Response) -> Result<(), BoxError> {
//!     let id = req.param_int("id").unwrap_or_default();
//!     res.send_text((id * 2).to_string()).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/items/<id:int>", double)?;
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run(router, ServerConfig::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Handlers
//!
//! A handler is any `Fn(Request, Response) -> impl Future<Output = Result<(), BoxError>>`.
//! It finishes the exchange with exactly one terminal operation on the
//! [`Response`]: a buffered `send_*` call, or a streaming body opened with
//! [`Response::stream`] / [`Response::open_body`]. A handler that sends
//! nothing gets an empty response; a handler that fails before sending gets a
//! `500`.

pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

/// Error type returned by handlers and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use http::{BodyWriter, Headers, Method, Request, Response, ResponseError, StatusCode};
pub use middleware::Middleware;
pub use router::{Endpoint, RouteError, Router};
pub use server::{Server, ServerConfig, ServerError};
