//! Router composition: mounted sub-routers, explicit verb tables and
//! `path` converters.
//!
//! ```text
//! cargo run --example nested_router
//! curl http://127.0.0.1:8080/1/2/
//! curl http://127.0.0.1:8080/3-4
//! curl -X PUT http://127.0.0.1:8080/api/users/7
//! curl http://127.0.0.1:8080/api/files/docs/readme.md
//! curl -X POST http://127.0.0.1:8080/api/users/7     # 405, Allow: GET, PUT
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wicket::router::{Endpoint, Router};
use wicket::server::{Server, ServerConfig};
use wicket::{BoxError, Request, Response};

async fn show_params(req: Request, res: Response) -> Result<(), BoxError> {
    let pairs: Vec<String> = req
        .params()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    res.send_text(pairs.join(", ")).await?;
    Ok(())
}

async fn update_user(req: Request, res: Response) -> Result<(), BoxError> {
    let id = req.param_int("id").unwrap_or_default();
    res.send_text(format!("updated user {id} with {} bytes", req.body().len()))
        .await?;
    Ok(())
}

fn api() -> Result<Router, wicket::RouteError> {
    let mut users = Router::new();
    users.endpoint(
        "/<id:int>",
        Endpoint::new().get(show_params).put(update_user),
    )?;

    let mut api = Router::new();
    api.mount("/users", users)?;
    api.get("/files/<file:path>", show_params)?;
    Ok(api)
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

    // `/<a:int>/` + `/<b:int>/` matches `/1/2/`: the seam collapses to one `/`.
    let mut inner = Router::new();
    inner.get("/<b:int>/", show_params)?;

    // No separator on either side: `/<a:int>` + `-<b:int>` matches `/3-4`.
    let mut dashed = Router::new();
    dashed.get("-<b:int>", show_params)?;

    let mut root = Router::new();
    root.mount("/api/", api()?)?;
    root.mount("/<a:int>/", inner)?;
    root.mount("/<a:int>", dashed)?;

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!("listening on http://{}", server.local_addr());
    server.run(root, ServerConfig::default()).await?;
    Ok(())
}
