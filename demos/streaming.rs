//! Chunked streaming responses.
//!
//! ```text
//! cargo run --example streaming
//! curl -N http://127.0.0.1:8080/countdown/5
//! curl -N http://127.0.0.1:8080/lines
//! ```

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wicket::router::Router;
use wicket::server::{Server, ServerConfig};
use wicket::{BoxError, Request, Response};

// Scoped form: the terminating chunk is written when the closure returns.
async fn countdown(req: Request, res: Response) -> Result<(), BoxError> {
    let from = req.param_int("from").unwrap_or(3).clamp(0, 60);
    res.set_header("Content-Type", "text/plain; charset=utf-8")?;
    res.stream(|mut body| async move {
        for n in (1..=from).rev() {
            body.write(format!("{n}...\n")).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        body.write("liftoff\n").await?;
        Ok::<(), BoxError>(())
    })
    .await
}

// Manual form: the server terminates the stream if the handler returns
// without calling `finish`.
async fn lines(_req: Request, res: Response) -> Result<(), BoxError> {
    let mut body = res.open_body().await?;
    for i in 0..1000 {
        body.write(format!("line {i:>10}\n")).await?;
    }
    body.finish().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wicket=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut router = Router::new();
    router.get("/countdown/<from:int>", countdown)?;
    router.get("/lines", lines)?;

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!("listening on http://{}", server.local_addr());
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };
    server
        .run_until(router, ServerConfig::default(), ctrl_c)
        .await?;
    Ok(())
}
