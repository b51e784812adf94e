//! Middleware: before/after hooks around matched handlers.
//!
//! A [`Middleware`] observes every request that resolved to a handler. The
//! [`MiddlewareChain`] drives the registered hooks in order:
//!
//! 1. every `before` hook, in registration order, until one returns
//!    [`ControlFlow::Break`] (it has produced the final response itself) or
//!    fails;
//! 2. the handler, unless a hook broke out;
//! 3. every `after` hook, in registration order, regardless of how steps 1
//!    and 2 ended.
//!
//! Requests that match no route (404) or no method (405) never reach the
//! chain.
//!
//! `after` hooks run once the response has been sent (or has failed), so they
//! are for observation only: logging, metrics, auditing.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{BoxError, Request, Response};

/// The core trait for all middleware.
///
/// Both hooks have no-op defaults, so an implementation only overrides the
/// side it cares about.
///
/// # Contract
///
/// - Implementations must be `Send + Sync`: one instance is shared by every
///   connection task.
/// - `before` may send a response through `res` and return
///   `ControlFlow::Break(())`; the handler and remaining `before` hooks are
///   then skipped.
/// - Returning `Err` (or panicking) from `before` is a handler fault.
///
/// # Examples
///
/// ```rust
/// use std::ops::ControlFlow;
///
/// use futures_util::future::BoxFuture;
/// use wicket::middleware::Middleware;
/// use wicket::{BoxError, Method, Request, Response, StatusCode};
///
/// struct ReadOnly;
///
/// impl Middleware for ReadOnly {
///     fn before<'a>(
///         &'a self,
///         req: &'a Request,
///         res: &'a Response,
///     ) -> BoxFuture<'a, Result<ControlFlow<()>, BoxError>> {
///         Box::pin(async move {
///             if *req.method() == Method::Post {
///                 res.set_status(StatusCode::Forbidden)?;
///                 res.send_text("read-only").await?;
///                 return Ok(ControlFlow::Break(()));
///             }
///             Ok(ControlFlow::Continue(()))
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    fn before<'a>(
        &'a self,
        req: &'a Request,
        res: &'a Response,
    ) -> BoxFuture<'a, Result<ControlFlow<()>, BoxError>> {
        let _ = (req, res);
        Box::pin(async { Ok(ControlFlow::Continue(())) })
    }

    fn after<'a>(&'a self, req: &'a Request, res: &'a Response) -> BoxFuture<'a, ()> {
        let _ = (req, res);
        Box::pin(async {})
    }
}

/// An ordered, immutable list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs the `before` hooks in order.
    ///
    /// Returns `Ok(ControlFlow::Break(()))` as soon as a hook short-circuits.
    /// A hook that fails or panics stops the chain with `Err`.
    pub async fn run_before(
        &self,
        req: &Request,
        res: &Response,
    ) -> Result<ControlFlow<()>, BoxError> {
        for middleware in &self.middlewares {
            let outcome = AssertUnwindSafe(middleware.before(req, res))
                .catch_unwind()
                .await
                .map_err(panic_error)??;
            if outcome.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Runs every `after` hook in order. A panicking hook is logged and the
    /// rest still run.
    pub async fn run_after(&self, req: &Request, res: &Response) {
        for middleware in &self.middlewares {
            if let Err(payload) = AssertUnwindSafe(middleware.after(req, res))
                .catch_unwind()
                .await
            {
                tracing::warn!(
                    path = req.path(),
                    error = %panic_message(payload.as_ref()),
                    "after hook panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Turns a caught panic into a handler fault.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> BoxError {
    format!("panicked: {}", panic_message(payload.as_ref())).into()
}

/// Built-in middleware that logs each request's method, path, status and duration.
///
/// Emits one `tracing::info!` event per request from its `after` hook:
///
/// ```text
/// GET /items/21 - 200 (312.5µs)
/// ```
///
/// Duration is measured from the moment the request head was parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl Middleware for AccessLog {
    fn after<'a>(&'a self, req: &'a Request, res: &'a Response) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let elapsed = req.received_at().elapsed();
            let status = res.status().as_u16();
            tracing::info!(
                method = req.method().as_str(),
                path = req.path(),
                status,
                ?elapsed,
                "{} {} - {} ({:?})",
                req.method().as_str(),
                req.path(),
                status,
                elapsed
            );
        })
    }
}
