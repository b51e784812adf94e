//! Server configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::Headers;
use crate::middleware::{Middleware, MiddlewareChain};

/// Per-connection resource limits.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use wicket::server::Limits;
///
/// let limits = Limits::default()
///     .with_max_body_size(1024 * 1024)
///     .with_keep_alive_timeout(Duration::from_secs(5));
/// assert_eq!(limits.max_headers, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest request line plus header section, in bytes.
    pub max_head_size: usize,
    /// Most header fields accepted in one request.
    pub max_headers: usize,
    /// Largest decoded request body, in bytes.
    pub max_body_size: usize,
    /// Time allowed to finish a request head once its first byte arrived.
    pub head_timeout: Duration,
    /// Idle time allowed between requests on a kept-alive connection.
    pub keep_alive_timeout: Duration,
    /// Time allowed for each read while receiving a body.
    pub body_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_head_size: 16 * 1024,
            max_headers: 64,
            max_body_size: 8 * 1024 * 1024,
            head_timeout: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(75),
            body_timeout: Duration::from_secs(30),
        }
    }
}

impl Limits {
    pub fn with_max_head_size(mut self, bytes: usize) -> Self {
        self.max_head_size = bytes;
        self
    }

    pub fn with_max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout = timeout;
        self
    }

    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn with_body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = timeout;
        self
    }
}

/// Everything a [`Server`](super::Server) needs besides the router.
///
/// Default headers are copied into every response (error responses
/// included) before the handler runs, so handler-set headers come after
/// them and can replace them.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use wicket::middleware::AccessLog;
/// use wicket::server::ServerConfig;
///
/// let config = ServerConfig::default()
///     .with_default_header("Server", "wicket")
///     .with_middleware(AccessLog)
///     .with_drain_timeout(Duration::from_secs(1));
/// assert_eq!(config.default_headers.get("server"), Some("wicket"));
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    pub default_headers: Headers,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub limits: Limits,
    /// How long graceful shutdown waits for open connections before aborting them.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_headers: Headers::new(),
            middlewares: Vec::new(),
            limits: Limits::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header sent on every response.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    /// Appends a middleware; hooks run in the order they were added.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_shared_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub(crate) fn chain(&self) -> MiddlewareChain {
        MiddlewareChain::new(self.middlewares.clone())
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("default_headers", &self.default_headers)
            .field("middlewares", &self.middlewares.len())
            .field("limits", &self.limits)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}
