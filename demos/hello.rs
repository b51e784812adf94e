//! Minimal server: typed path parameters, query strings, JSON and forms.
//!
//! ```text
//! cargo run --example hello
//! curl http://127.0.0.1:8080/items/21
//! curl 'http://127.0.0.1:8080/greet?name=Ada'
//! curl -d 'a=1&b=2' http://127.0.0.1:8080/form
//! ```

use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wicket::router::Router;
use wicket::server::{Server, ServerConfig};
use wicket::{BoxError, Request, Response, StatusCode};

#[derive(Serialize)]
struct Item {
    id: i64,
    doubled: i64,
}

async fn index(_req: Request, res: Response) -> Result<(), BoxError> {
    res.send_html("<h1>wicket</h1><p>Try <a href=\"/items/21\">/items/21</a>.</p>")
        .await?;
    Ok(())
}

async fn item(req: Request, res: Response) -> Result<(), BoxError> {
    let id = req.param_int("id").ok_or("id is always captured")?;
    res.send_json(&Item {
        id,
        doubled: id * 2,
    })
    .await?;
    Ok(())
}

async fn greet(req: Request, res: Response) -> Result<(), BoxError> {
    let name = req.query_param("name").unwrap_or("world");
    res.send_text(format!("Hello, {name}!")).await?;
    Ok(())
}

async fn form(req: Request, res: Response) -> Result<(), BoxError> {
    let fields = match req.form() {
        Ok(fields) => fields,
        Err(e) => {
            res.set_status(StatusCode::UnsupportedMediaType)?;
            res.send_text(e.to_string()).await?;
            return Ok(());
        }
    };
    let lines: Vec<String> = fields.iter().map(|(k, v)| format!("{k} = {v}")).collect();
    res.send_text(lines.join("\n")).await?;
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
    router.get("/", index)?;
    router.get("/items/<id:int>", item)?;
    router.get("/greet", greet)?;
    router.post("/form", form)?;

    let config = ServerConfig::default().with_default_header("Server", "wicket");
    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!("listening on http://{}", server.local_addr());
    server.run(router, config).await?;
    Ok(())
}
