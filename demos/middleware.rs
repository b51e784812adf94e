//! Before/after middleware: short-circuiting and access logging.
//!
//! ```text
//! cargo run --example middleware
//! curl http://127.0.0.1:8080/          # handled
//! curl -X POST http://127.0.0.1:8080/  # answered by the middleware
//! ```

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wicket::middleware::{AccessLog, Middleware};
use wicket::router::{Endpoint, Router};
use wicket::server::{Server, ServerConfig};
use wicket::{BoxError, Method, Request, Response, StatusCode};

/// Refuses every write request before it reaches a handler.
struct ReadOnly;

impl Middleware for ReadOnly {
    fn before<'a>(
        &'a self,
        req: &'a Request,
        res: &'a Response,
    ) -> BoxFuture<'a, Result<ControlFlow<()>, BoxError>> {
        Box::pin(async move {
            if *req.method() == Method::Post {
                res.set_status(StatusCode::Forbidden)?;
                res.send_text("this server is read-only").await?;
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })
    }
}

/// Counts requests that reached the middleware chain.
#[derive(Default)]
struct Counter {
    seen: AtomicU64,
}

impl Middleware for Counter {
    fn after<'a>(&'a self, _req: &'a Request, _res: &'a Response) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(seen, "request counted");
        })
    }
}

async fn home(_req: Request, res: Response) -> Result<(), BoxError> {
    res.send_text("welcome").await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wicket=info,middleware=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut router = Router::new();
    router.endpoint("/", Endpoint::new().get(home).post(home))?;

    let config = ServerConfig::default()
        .with_default_header("Server", "wicket")
        .with_middleware(AccessLog)
        .with_middleware(ReadOnly)
        .with_middleware(Counter::default());

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!("listening on http://{}", server.local_addr());
    server.run(router, config).await?;
    Ok(())
}
