//! Request routing: map URL patterns and HTTP methods to handlers.
//!
//! A [`Router`] is an ordered list of routes. Each route pairs a compiled
//! [`Pattern`] with a target: either a verb→handler table or another
//! `Router` mounted under the pattern.
//!
//! | Pattern                  | Example match        | Captured params          |
//! |--------------------------|----------------------|--------------------------|
//! | `/users`                 | `/users`             | *(none)*                 |
//! | `/users/<id:int>`        | `/users/42`          | `id → Int(42)`           |
//! | `/files/<rest:path>`     | `/files/a/b.txt`     | `rest → Path("a/b.txt")` |
//! | `/<a:int>-<b:int>`       | `/3-4`               | `a → 3, b → 4`           |
//!
//! Routes are tried in registration order and the first full match wins. A
//! path that matches some route but none accepting the request method
//! resolves to [`RouteMatch::MethodNotAllowed`] with the union of the methods
//! those routes accept; a path that matches nothing resolves to
//! [`RouteMatch::NotFound`].
//!
//! ## Mounting
//!
//! When a mount pattern ends in `/` and the child pattern begins with `/`,
//! the two separators collapse into one: mounting a router containing
//! `/<b:int>/` under `/<a:int>/` matches `/1/2/`. A child pattern without a
//! leading `/` continues right after the parent's separator, so `items`
//! mounted under `/api/` matches `/api/items`.

mod params;
mod pattern;

use std::sync::Arc;

use futures_util::future::BoxFuture;

pub use params::{ParamValue, PathParams};
pub use pattern::{ConverterKind, Pattern, RouteError};

use crate::{BoxError, Method, Request, Response};

/// The future returned by a [`Handler`].
pub type HandlerFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Type-erased async handler.
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be shared by every
/// connection task without copying the underlying closure. Build one with
/// [`handler`], or let the registration helpers convert any [`IntoHandler`].
pub type Handler = Arc<dyn Fn(Request, Response) -> HandlerFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request, Response) -> impl Future<Output = Result<(), BoxError>> + Send`
/// that is also `Send + Sync + 'static` implements this trait through the
/// blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, req: Request, res: Response) -> HandlerFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request, Response) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn call(&self, req: Request, res: Response) -> HandlerFuture {
        Box::pin((self)(req, res))
    }
}

/// Erases the concrete type of an async handler function.
pub fn handler(h: impl IntoHandler) -> Handler {
    Arc::new(move |req, res| h.call(req, res))
}

/// An explicit verb→handler table registered under one pattern.
///
/// # Examples
///
/// ```rust
/// use wicket::router::{Endpoint, Router};
/// use wicket::{BoxError, Request, Response};
///
/// async fn list(_req: Request, res: Response) -> Result<(), BoxError> {
///     Ok(res.send_text("[]").await?)
/// }
///
/// async fn create(_req: Request, res: Response) -> Result<(), BoxError> {
///     Ok(res.send_text("created").await?)
/// }
///
/// let mut router = Router::new();
/// router.endpoint("/items", Endpoint::new().get(list).post(create)).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct Endpoint {
    handlers: Vec<(Method, Handler)>,
}

impl Endpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `method` to `h`. A later binding for the same method replaces
    /// the earlier one.
    pub fn on(self, method: Method, h: impl IntoHandler) -> Self {
        self.bind(method, handler(h))
    }

    fn bind(mut self, method: Method, h: Handler) -> Self {
        match self.handlers.iter_mut().find(|(m, _)| *m == method) {
            Some(entry) => entry.1 = h,
            None => self.handlers.push((method, h)),
        }
        self
    }

    pub fn get(self, h: impl IntoHandler) -> Self {
        self.on(Method::Get, h)
    }

    pub fn post(self, h: impl IntoHandler) -> Self {
        self.on(Method::Post, h)
    }

    pub fn put(self, h: impl IntoHandler) -> Self {
        self.on(Method::Put, h)
    }

    pub fn delete(self, h: impl IntoHandler) -> Self {
        self.on(Method::Delete, h)
    }

    pub fn patch(self, h: impl IntoHandler) -> Self {
        self.on(Method::Patch, h)
    }

    pub fn head(self, h: impl IntoHandler) -> Self {
        self.on(Method::Head, h)
    }

    pub fn options(self, h: impl IntoHandler) -> Self {
        self.on(Method::Options, h)
    }

    /// Returns the bound methods in binding order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.handlers.iter().map(|(m, _)| m)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    // Exact method first; HEAD falls back to GET.
    fn pick(&self, method: &Method) -> Option<&Handler> {
        let find = |wanted: &Method| {
            self.handlers
                .iter()
                .find(|(m, _)| m == wanted)
                .map(|(_, h)| h)
        };
        find(method).or_else(|| match method {
            Method::Head => find(&Method::Get),
            _ => None,
        })
    }
}

/// What a route dispatches to.
#[derive(Clone)]
pub enum RouteTarget {
    /// A handler, bound to the methods passed at registration.
    Handler(Handler),
    /// A mounted sub-router; method checks are left to its own routes.
    Router(Router),
}

impl From<Handler> for RouteTarget {
    fn from(h: Handler) -> Self {
        Self::Handler(h)
    }
}

impl From<Router> for RouteTarget {
    fn from(router: Router) -> Self {
        Self::Router(router)
    }
}

#[derive(Clone)]
enum Target {
    Endpoint(Endpoint),
    // `seam` is set when the mount pattern's trailing `/` was stripped.
    Mount { router: Router, seam: bool },
}

#[derive(Clone)]
struct Route {
    pattern: Pattern,
    target: Target,
}

/// A resolved handler and the parameters captured on the way to it.
#[derive(Clone)]
pub struct Matched {
    pub handler: Handler,
    pub params: PathParams,
}

/// Outcome of [`Router::resolve`].
#[derive(Clone)]
pub enum RouteMatch {
    Matched(Matched),
    /// The path matched, the method did not; lists the accepted methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched(m) => f.debug_struct("Matched").field("params", &m.params).finish(),
            Self::MethodNotAllowed(allowed) => {
                f.debug_tuple("MethodNotAllowed").field(allowed).finish()
            }
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// HTTP request router.
///
/// Built once at startup and read-only afterwards; the server shares it
/// between connection tasks behind an `Arc`.
///
/// # Examples
///
/// ```rust
/// use wicket::router::{RouteMatch, Router};
/// use wicket::{BoxError, Method, Request, Response};
///
/// async fn double(req: Request, res: Response) -> Result<(), BoxError> {
///     let id = req.param_int("id").unwrap_or_default();
///     res.send_text((id * 2).to_string()).await?;
///     Ok(())
/// }
///
/// let mut router = Router::new();
/// router.get("/items/<id:int>", double).unwrap();
///
/// assert!(matches!(router.resolve("/items/21", &Method::Get), RouteMatch::Matched(_)));
/// assert!(matches!(router.resolve("/items/abc", &Method::Get), RouteMatch::NotFound));
/// ```
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `target` under `pattern`.
    ///
    /// For a handler target, `methods` is the set of verbs it accepts. For a
    /// router target `methods` is ignored and the call behaves like
    /// [`mount`](Self::mount).
    ///
    /// # Errors
    ///
    /// - any pattern compilation error;
    /// - [`RouteError::NoMethods`] for a handler target with no methods;
    /// - [`RouteError::PathInMount`] for a router target whose pattern
    ///   contains a `path` converter.
    pub fn add(
        &mut self,
        pattern: &str,
        target: impl Into<RouteTarget>,
        methods: &[Method],
    ) -> Result<&mut Self, RouteError> {
        match target.into() {
            RouteTarget::Handler(h) => {
                let endpoint = methods
                    .iter()
                    .fold(Endpoint::new(), |endpoint, method| {
                        endpoint.bind(method.clone(), h.clone())
                    });
                self.endpoint(pattern, endpoint)
            }
            RouteTarget::Router(router) => self.mount(pattern, router),
        }
    }

    /// Registers an explicit verb→handler table under `pattern`.
    pub fn endpoint(&mut self, pattern: &str, endpoint: Endpoint) -> Result<&mut Self, RouteError> {
        let compiled = Pattern::parse(pattern)?;
        if endpoint.is_empty() {
            return Err(RouteError::NoMethods {
                pattern: pattern.to_owned(),
            });
        }
        self.routes.push(Route {
            pattern: compiled,
            target: Target::Endpoint(endpoint),
        });
        Ok(self)
    }

    /// Mounts `router` under `pattern`.
    pub fn mount(&mut self, pattern: &str, router: Router) -> Result<&mut Self, RouteError> {
        let mut compiled = Pattern::parse(pattern)?;
        if compiled.has_path_converter() {
            return Err(RouteError::PathInMount {
                pattern: pattern.to_owned(),
            });
        }
        let seam = compiled.ends_with_slash();
        if seam {
            compiled.strip_trailing_slash();
        }
        self.routes.push(Route {
            pattern: compiled,
            target: Target::Mount { router, seam },
        });
        Ok(self)
    }

    /// Registers a `GET` handler (which also serves `HEAD`).
    pub fn get(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().get(h))
    }

    pub fn post(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().post(h))
    }

    pub fn put(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().put(h))
    }

    pub fn delete(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().delete(h))
    }

    pub fn patch(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().patch(h))
    }

    pub fn options(&mut self, pattern: &str, h: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.endpoint(pattern, Endpoint::new().options(h))
    }

    /// Returns the number of routes registered directly on this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves a request path and method to a handler.
    ///
    /// `path` is the raw request path without its query string.
    pub fn resolve(&self, path: &str, method: &Method) -> RouteMatch {
        let mut params = PathParams::new();
        let mut allowed = Vec::new();
        match self.lookup(path, method, false, &mut params, &mut allowed) {
            Some(handler) => RouteMatch::Matched(Matched { handler, params }),
            None if allowed.is_empty() => RouteMatch::NotFound,
            None => RouteMatch::MethodNotAllowed(allowed),
        }
    }

    // `seam` means the parent consumed a mount prefix whose trailing `/` was
    // stripped; `path` then still starts with that `/`.
    fn lookup(
        &self,
        path: &str,
        method: &Method,
        seam: bool,
        params: &mut PathParams,
        allowed: &mut Vec<Method>,
    ) -> Option<Handler> {
        for route in &self.routes {
            let candidate = if seam && !route.pattern.starts_with_slash() {
                &path[1..]
            } else {
                path
            };
            let mark = params.len();

            match &route.target {
                Target::Endpoint(endpoint) => {
                    if !route.pattern.match_full(candidate, params) {
                        continue;
                    }
                    if let Some(h) = endpoint.pick(method) {
                        return Some(h.clone());
                    }
                    for m in endpoint.methods() {
                        if !allowed.contains(m) {
                            allowed.push(m.clone());
                        }
                    }
                }
                Target::Mount {
                    router,
                    seam: child_seam,
                } => {
                    let Some(consumed) = route.pattern.match_prefix(candidate, params) else {
                        continue;
                    };
                    let rest = &candidate[consumed..];
                    if !*child_seam || rest.starts_with('/') {
                        if let Some(h) = router.lookup(rest, method, *child_seam, params, allowed) {
                            return Some(h);
                        }
                    }
                }
            }
            params.truncate(mark);
        }
        None
    }
}
